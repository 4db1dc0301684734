// 移動和によるローパスフィルタ
// 直近 N サンプルの和を差分で更新し、log2(N) ビット右シフトで平均を出す（切り捨て）。
// 起動直後の N-1 回は履歴に 0 が残るので出力が立ち上がり途中になるが、補正はしない。

pub struct LowPassFilter<const N: usize> {
    history: [u16; N],
    index: usize,
    sum: u32,
}

impl<const N: usize> LowPassFilter<N> {
    // 2のべき乗でないとシフトで割れない
    const SIZE_IS_POW2: () = assert!(N > 0 && N.is_power_of_two() && N <= 1 << 16);
    pub const SHIFT: u32 = N.trailing_zeros();

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_IS_POW2;
        Self {
            history: [0; N],
            index: 0,
            sum: 0,
        }
    }

    /// 新しいサンプルを入れてフィルタ後の値を返す
    pub fn update(&mut self, sample: u16) -> u16 {
        // これから上書きするスロットが一番古いサンプル
        let evicted = self.history[self.index];
        self.history[self.index] = sample;
        self.sum = self.sum + u32::from(sample) - u32::from(evicted);
        self.index = (self.index + 1) & (N - 1);
        self.output()
    }

    pub fn output(&self) -> u16 {
        (self.sum >> Self::SHIFT) as u16
    }

    pub fn running_sum(&self) -> u32 {
        self.sum
    }

    pub fn history(&self) -> &[u16; N] {
        &self.history
    }
}

impl<const N: usize> Default for LowPassFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_ramps_up_to_input() {
        let mut lpf: LowPassFilter<4> = LowPassFilter::new();
        let out: std::vec::Vec<u16> = (0..4).map(|_| lpf.update(2048)).collect();
        assert_eq!(out, [512, 1024, 1536, 2048]);
        assert_eq!(lpf.running_sum(), 8192);
    }

    #[test]
    fn constant_input_settles_on_input() {
        let mut lpf: LowPassFilter<4> = LowPassFilter::new();
        for v in [4095u16, 0, 17, 3000, 1234] {
            let mut out = 0;
            for _ in 0..4 {
                out = lpf.update(v);
            }
            assert_eq!(out, v);
            for _ in 0..3 {
                assert_eq!(lpf.update(v), v);
            }
        }
    }

    #[test]
    fn running_sum_matches_history() {
        let mut lpf: LowPassFilter<8> = LowPassFilter::new();
        let mut seed = 0x1234_5678u32;
        for _ in 0..1000 {
            // 適当な擬似乱数で 12bit の値を作る
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let sample = (seed >> 20) as u16 & 0x0FFF;
            lpf.update(sample);
            let recomputed: u32 = lpf.history().iter().map(|&s| u32::from(s)).sum();
            assert_eq!(lpf.running_sum(), recomputed);
        }
    }

    #[test]
    fn output_truncates_toward_zero() {
        let mut lpf: LowPassFilter<4> = LowPassFilter::new();
        for v in [1, 1, 1, 0] {
            lpf.update(v);
        }
        // 3 / 4 = 0
        assert_eq!(lpf.output(), 0);
        assert_eq!(LowPassFilter::<4>::SHIFT, 2);
    }
}
