// 割り込みとタスクの間でデータを受け渡す演習のボード非依存部分
//
// - ring_buffer: 割り込みとタスクで共有するロック無しのリングバッファ
// - filter / adc: ADC 変換完了割り込み -> LPF -> タスクへ渡すパイプライン
// - debounce: 押しボタンのデバウンス用ステートマシン
// - serial: リングバッファを使った割り込み駆動の UART
// - alarm: ADC の値によるアラームレベル判定
//
// レジスタには trait 越しにアクセスするので、ホストで偽物のレジスタを使ってテストできる。
// 実機への結び付けは firmware/ 側。

#![cfg_attr(not(test), no_std)]

pub mod adc;
pub mod alarm;
pub mod config;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod register;
pub mod ring_buffer;
pub mod serial;

pub use adc::{pot_init, AdcReg, AdcRegisters, PotIsr, PotTrigger, Sample};
pub use alarm::{AlarmLevel, AlarmMonitor};
pub use debounce::{debounce_task_init, ButtonEvent, DebounceTask, Debouncer, State};
pub use error::{Error, Result};
pub use filter::LowPassFilter;
pub use ring_buffer::RingBuffer;
pub use serial::{port_init, SerialIsr, SerialPort, UsartReg, UsartRegisters};
