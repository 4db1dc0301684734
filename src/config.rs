// 各演習の定数とランタイム設定
// クロックは NUCLEO-F446RE を HSE(ST-Link 8MHz) -> PLL -> 180MHz で動かす前提

// SYSCLK: 180MHz
pub const SYSCLK_HZ: u32 = 180_000_000;
// APB1: 45MHz (USART2)
pub const PCLK1_HZ: u32 = 45_000_000;
// APB2: 90MHz (ADC1)
pub const PCLK2_HZ: u32 = 90_000_000;

// ADC タスクの変換周期
pub const ADC_PERIOD_MS: u32 = 125;
// LPF の履歴数（2のべき乗であること）
pub const LPF_SIZE: usize = 4;

// デバウンスのポーリング周期
pub const DEBOUNCE_TICK_MS: u32 = 50;
// Single 状態にこのティック数留まったらリピート扱い
pub const REPEAT_THRESHOLD_TICKS: u32 = 10;
// リピート中はこのティック数ごとに通知
pub const REPEAT_INTERVAL_TICKS: u32 = 4;

// UART の設定
pub const UART_BAUD: u32 = 115_200;
pub const RX_BUFFER_SIZE: usize = 64;
pub const TX_BUFFER_SIZE: usize = 128;

/// ADC のサンプリング時間（ADCCLK サイクル数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleTime {
    Cycles3 = 0,
    Cycles15 = 1,
    Cycles28 = 2,
    Cycles56 = 3,
    Cycles84 = 4,
    Cycles112 = 5,
    Cycles144 = 6,
    Cycles480 = 7,
}

/// ADC クロックのプリスケーラ（PCLK2 の分周比）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcPrescaler {
    Div2 = 0,
    Div4 = 1,
    Div6 = 2,
    Div8 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PotConfig {
    pub channel: u8,
    pub sample_time: SampleTime,
    pub prescaler: AdcPrescaler,
    // ADON 後の安定待ち時間
    pub stabilization_us: u32,
}

impl Default for PotConfig {
    fn default() -> Self {
        // PA4 = ADC1_IN4, 90MHz / 4 = 22.5MHz
        Self {
            channel: 4,
            sample_time: SampleTime::Cycles3,
            prescaler: AdcPrescaler::Div4,
            stabilization_us: 3,
        }
    }
}

/// 送信リングバッファが満杯のときの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFullPolicy {
    /// 入りきらない文字は捨てる（割り込みコンテキストからでも呼べる）
    Drop,
    /// 送信割り込みが空きを作るまで待つ（タスクからのみ）
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    // USART に入るペリフェラルクロック
    pub pclk_hz: u32,
    pub baud: u32,
    pub tx_full: TxFullPolicy,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            pclk_hz: PCLK1_HZ,
            baud: UART_BAUD,
            tx_full: TxFullPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub repeat_threshold: u32,
    pub repeat_interval: u32,
    // ボタン押下で入力が L になる配線（NUCLEO の B1 はこちら）
    pub active_low: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: REPEAT_THRESHOLD_TICKS,
            repeat_interval: REPEAT_INTERVAL_TICKS,
            active_low: true,
        }
    }
}

/// アラームレベルの閾値（フィルタ後の 12bit 値、昇順）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmThresholds {
    pub low: u16,
    pub medium: u16,
    pub high: u16,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            low: 1024,
            medium: 2048,
            high: 3072,
        }
    }
}
