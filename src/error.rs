use core::fmt;

// 設定値の誤りや送信バッファ溢れなど、呼び出し側で回復できるエラー。
// 使い方の誤り（変換中の再トリガー、未初期化バッファの使用など）は assert! で止める。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// ADC の入力チャンネル番号が範囲外
    InvalidChannel(u8),
    /// ボーレートが 0、またはクロックに対して BRR が表現できない
    InvalidBaudRate(u32),
    /// 閾値の並びがおかしい（昇順でない、0 が指定されている等）
    InvalidThreshold,
    /// 送信バッファが満杯で文字を捨てた
    TxFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidChannel(ch) => write!(f, "adc channel {} out of range", ch),
            Error::InvalidBaudRate(baud) => write!(f, "baud rate {} not reachable", baud),
            Error::InvalidThreshold => write!(f, "thresholds must be non-zero and ascending"),
            Error::TxFull => write!(f, "tx buffer full, byte dropped"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
