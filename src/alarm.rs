// アラーム判定
// ADC タスクから受け取ったフィルタ後の値を閾値で 4 段階に分け、レベルが変わった時だけ通知する。

use crate::config::AlarmThresholds;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmLevel {
    None,
    Low,
    Medium,
    High,
}

impl AlarmLevel {
    /// イベントフラグとして使う時のビット
    pub const fn bits(self) -> u32 {
        match self {
            AlarmLevel::None => 1 << 0,
            AlarmLevel::Low => 1 << 1,
            AlarmLevel::Medium => 1 << 2,
            AlarmLevel::High => 1 << 3,
        }
    }
}

pub struct AlarmMonitor {
    thresholds: AlarmThresholds,
    level: AlarmLevel,
}

impl AlarmMonitor {
    pub fn new(thresholds: AlarmThresholds) -> Result<Self> {
        let t = thresholds;
        if t.low == 0 || t.low >= t.medium || t.medium >= t.high {
            return Err(Error::InvalidThreshold);
        }
        Ok(Self {
            thresholds,
            level: AlarmLevel::None,
        })
    }

    pub fn classify(&self, value: u16) -> AlarmLevel {
        let t = &self.thresholds;
        if value >= t.high {
            AlarmLevel::High
        } else if value >= t.medium {
            AlarmLevel::Medium
        } else if value >= t.low {
            AlarmLevel::Low
        } else {
            AlarmLevel::None
        }
    }

    /// 新しい値でレベルを更新し、変わった時だけ新しいレベルを返す
    pub fn update(&mut self, value: u16) -> Option<AlarmLevel> {
        let level = self.classify(value);
        if level == self.level {
            return None;
        }
        self.level = level;
        Some(level)
    }

    pub fn level(&self) -> AlarmLevel {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_thresholds() {
        let m = AlarmMonitor::new(AlarmThresholds::default()).unwrap();
        assert_eq!(m.classify(0), AlarmLevel::None);
        assert_eq!(m.classify(1023), AlarmLevel::None);
        assert_eq!(m.classify(1024), AlarmLevel::Low);
        assert_eq!(m.classify(2048), AlarmLevel::Medium);
        assert_eq!(m.classify(4095), AlarmLevel::High);
    }

    #[test]
    fn only_changes_are_reported() {
        let mut m = AlarmMonitor::new(AlarmThresholds::default()).unwrap();
        assert_eq!(m.update(100), None);
        assert_eq!(m.update(1500), Some(AlarmLevel::Low));
        assert_eq!(m.update(1600), None);
        assert_eq!(m.update(3500), Some(AlarmLevel::High));
        assert_eq!(m.update(10), Some(AlarmLevel::None));
        assert_eq!(m.level(), AlarmLevel::None);
    }

    #[test]
    fn flag_bits_are_distinct() {
        assert_eq!(AlarmLevel::None.bits(), 0b0001);
        assert_eq!(AlarmLevel::High.bits(), 0b1000);
    }

    #[test]
    fn unordered_thresholds_are_rejected() {
        let bad = AlarmThresholds {
            low: 2000,
            medium: 1000,
            high: 3000,
        };
        assert!(matches!(AlarmMonitor::new(bad), Err(Error::InvalidThreshold)));
    }
}
