// 割り込み駆動の UART 送受信
//
// 受信: RXNE 割り込みで DR を読み、受信リングバッファに積む。タスクは get_char() で取り出す。
//       バッファが満杯なら新しく届いたバイトを捨てる（捨てた数は rx_dropped() で見える）。
// 送信: タスクは put_char() で送信リングバッファに積み、TXEIE を立てる。
//       TXE 割り込みでバッファから 1 バイトずつ DR に書き、空になったら TXEIE を落とす。
//       送信バッファが満杯のときの振る舞いは TxFullPolicy で選ぶ。
//
// レジスタレイアウトは STM32F4 の USART (SR/DR/BRR/CR1~3)。

use core::convert::Infallible;
use core::fmt;

use crate::config::{SerialConfig, TxFullPolicy};
use crate::error::{Error, Result};
use crate::register::{bit, Field};
use crate::ring_buffer::{Consumer, Producer, RingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsartReg {
    Sr,
    Dr,
    Brr,
    Cr1,
    Cr2,
    Cr3,
}

/// USART のレジスタを 32bit 単位で読み書きする手段
pub trait UsartRegisters {
    fn read(&self, reg: UsartReg) -> u32;
    fn write(&self, reg: UsartReg, value: u32);

    fn modify<F: FnOnce(u32) -> u32>(&self, reg: UsartReg, f: F) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

impl<T: UsartRegisters + ?Sized> UsartRegisters for &T {
    fn read(&self, reg: UsartReg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: UsartReg, value: u32) {
        (**self).write(reg, value)
    }
}

// USART_SR
pub const SR_ORE: u32 = bit(3);
pub const SR_RXNE: u32 = bit(5);
pub const SR_TC: u32 = bit(6);
pub const SR_TXE: u32 = bit(7);

// USART_CR1
pub const CR1_RE: u32 = bit(2);
pub const CR1_TE: u32 = bit(3);
pub const CR1_RXNEIE: u32 = bit(5);
pub const CR1_TXEIE: u32 = bit(7);
pub const CR1_PCE: u32 = bit(10);
pub const CR1_M: u32 = bit(12);
pub const CR1_UE: u32 = bit(13);
pub const CR1_OVER8: u32 = bit(15);

// USART_CR2: ストップビット
pub const CR2_STOP: Field = Field::new(12, 2);

// USART_DR
pub const DR_DATA: Field = Field::new(0, 9);

/// 16 倍オーバーサンプリング時の BRR 値（四捨五入）
pub fn baud_rate_divisor(pclk_hz: u32, baud: u32) -> Result<u32> {
    if baud == 0 {
        return Err(Error::InvalidBaudRate(baud));
    }
    let brr = (u64::from(pclk_hz) + u64::from(baud / 2)) / u64::from(baud);
    // 仮数部 (BRR[15:4]) が 0 だと設定できない
    if !(0x10..=0xFFFF).contains(&brr) {
        return Err(Error::InvalidBaudRate(baud));
    }
    Ok(brr as u32)
}

/// USART を 8N1・受信割り込みありで初期化し、タスク側と割り込み側のハンドルを返す
///
/// リングバッファは初期化し直してから分割する。NVIC の許可は呼び出し側で行うこと。
pub fn port_init<'a, R, const RX: usize, const TX: usize>(
    regs: R,
    config: &SerialConfig,
    rx_buffer: &'a mut RingBuffer<RX>,
    tx_buffer: &'a mut RingBuffer<TX>,
) -> Result<(SerialPort<'a, R, RX, TX>, SerialIsr<'a, R, RX, TX>)>
where
    R: UsartRegisters + Clone,
{
    let brr = baud_rate_divisor(config.pclk_hz, config.baud)?;

    // 一旦止めてから設定する（割り込み要求もすべて落ちる）
    regs.write(UsartReg::Cr1, 0);
    regs.write(UsartReg::Cr2, 0);
    regs.write(UsartReg::Cr3, 0);

    // 8bit データ、パリティなし、16 倍オーバーサンプリング
    regs.modify(UsartReg::Cr1, |r| r & !(CR1_M | CR1_PCE | CR1_OVER8));
    // 1 ストップビット
    regs.modify(UsartReg::Cr2, |r| CR2_STOP.set(r, 0b00));

    regs.write(UsartReg::Brr, brr);

    // 受信割り込み、受信・送信を有効化してから USART を有効化
    regs.modify(UsartReg::Cr1, |r| r | CR1_RXNEIE | CR1_RE | CR1_TE);
    regs.modify(UsartReg::Cr1, |r| r | CR1_UE);

    rx_buffer.init();
    tx_buffer.init();
    let (rx_producer, rx_consumer) = rx_buffer.split();
    let (tx_producer, tx_consumer) = tx_buffer.split();

    Ok((
        SerialPort {
            regs: regs.clone(),
            rx: rx_consumer,
            tx: tx_producer,
            tx_full: config.tx_full,
        },
        SerialIsr {
            regs,
            rx: rx_producer,
            tx: tx_consumer,
            hw_overruns: 0,
        },
    ))
}

/// タスク側：送信バッファへの書き込みと受信バッファからの読み出し
pub struct SerialPort<'a, R, const RX: usize, const TX: usize> {
    regs: R,
    rx: Consumer<'a, RX>,
    tx: Producer<'a, TX>,
    tx_full: TxFullPolicy,
}

impl<'a, R: UsartRegisters, const RX: usize, const TX: usize> SerialPort<'a, R, RX, TX> {
    /// 1 文字送信キューに積む
    ///
    /// 満杯のとき、Drop なら Err(TxFull) を返して捨て、Block なら空くまで待つ。
    pub fn put_char(&mut self, c: u8) -> Result<()> {
        match self.tx_full {
            TxFullPolicy::Block => {
                match nb::block!(embedded_hal::serial::Write::write(&mut *self, c)) {
                    Ok(()) => Ok(()),
                    Err(never) => match never {},
                }
            }
            TxFullPolicy::Drop => match embedded_hal::serial::Write::write(&mut *self, c) {
                Ok(()) => Ok(()),
                Err(nb::Error::WouldBlock) => Err(Error::TxFull),
                Err(nb::Error::Other(never)) => match never {},
            },
        }
    }

    /// 文字列を送信キューに積む。Drop のときは入りきらなかった所で Err を返す
    pub fn put_string(&mut self, s: &str) -> Result<()> {
        for &c in s.as_bytes() {
            self.put_char(c)?;
        }
        Ok(())
    }

    /// 受信済みの 1 文字を取り出す
    pub fn get_char(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            None
        } else {
            Some(self.rx.get())
        }
    }

    /// 受信バッファ満杯で捨てたバイト数
    pub fn rx_dropped(&self) -> usize {
        self.rx.dropped()
    }

    pub fn tx_pending(&self) -> usize {
        self.tx.capacity() - self.tx.space()
    }

    // TXE 割り込みを有効にして送信を始める。
    // 割り込み側が TXEIE を落とすのはバッファが空のときだけなので、ここでの
    // read-modify-write と競合しても余分な割り込みが 1 回入るだけで済む。
    fn start_tx(&self) {
        self.regs.modify(UsartReg::Cr1, |r| r | CR1_TXEIE);
    }
}

impl<R: UsartRegisters, const RX: usize, const TX: usize> embedded_hal::serial::Write<u8>
    for SerialPort<'_, R, RX, TX>
{
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        if self.tx.is_full() {
            // 念のため送信が止まっていないことを確認しておく
            self.start_tx();
            return Err(nb::Error::WouldBlock);
        }
        self.tx.put(word);
        self.start_tx();
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        if self.tx_pending() == 0 && self.regs.read(UsartReg::Sr) & SR_TC != 0 {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl<R: UsartRegisters, const RX: usize, const TX: usize> embedded_hal::serial::Read<u8>
    for SerialPort<'_, R, RX, TX>
{
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.get_char().ok_or(nb::Error::WouldBlock)
    }
}

impl<R: UsartRegisters, const RX: usize, const TX: usize> fmt::Write for SerialPort<'_, R, RX, TX> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_string(s).map_err(|_| fmt::Error)
    }
}

/// 割り込み側：受信データの格納と送信データの書き出し
pub struct SerialIsr<'a, R, const RX: usize, const TX: usize> {
    regs: R,
    rx: Producer<'a, RX>,
    tx: Consumer<'a, TX>,
    hw_overruns: u32,
}

impl<'a, R: UsartRegisters, const RX: usize, const TX: usize> SerialIsr<'a, R, RX, TX> {
    /// USART 割り込みから呼ぶ
    pub fn on_interrupt(&mut self) {
        let sr = self.regs.read(UsartReg::Sr);

        // SR を読んだ後に DR を読むと RXNE と ORE が落ちる
        if sr & SR_RXNE != 0 {
            let byte = DR_DATA.get(self.regs.read(UsartReg::Dr)) as u8;
            // 満杯ならこのバイトは捨てられる
            self.rx.put(byte);
        } else if sr & SR_ORE != 0 {
            let _ = self.regs.read(UsartReg::Dr);
        }
        if sr & SR_ORE != 0 {
            // 取りこぼしたのはハードウェア側の 1 バイト
            self.hw_overruns = self.hw_overruns.wrapping_add(1);
        }

        let cr1 = self.regs.read(UsartReg::Cr1);
        if sr & SR_TXE != 0 && cr1 & CR1_TXEIE != 0 {
            if self.tx.is_empty() {
                self.regs.modify(UsartReg::Cr1, |r| r & !CR1_TXEIE);
            } else {
                let byte = self.tx.get();
                self.regs.write(UsartReg::Dr, u32::from(byte));
            }
        }
    }

    /// ORE（ハードウェアの受信オーバーラン）の回数
    pub fn hw_overruns(&self) -> u32 {
        self.hw_overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    // SR→DR の読み出しで RXNE/ORE が落ち、DR への書き込みで TXE が落ちる USART の偽物
    #[derive(Default)]
    struct FakeUsart {
        sr: Cell<u32>,
        rx_data: Cell<u32>,
        brr: Cell<u32>,
        cr1: Cell<u32>,
        cr2: Cell<u32>,
        cr3: Cell<u32>,
        sent: RefCell<Vec<u8>>,
    }

    impl FakeUsart {
        fn receive(&self, byte: u8) {
            let sr = self.sr.get();
            if sr & SR_RXNE != 0 {
                self.sr.set(sr | SR_ORE);
            } else {
                self.rx_data.set(u32::from(byte));
                self.sr.set(sr | SR_RXNE);
            }
        }

        // 送信シフトレジスタが空いた
        fn shift_out(&self) {
            self.sr.set(self.sr.get() | SR_TXE | SR_TC);
        }
    }

    impl UsartRegisters for FakeUsart {
        fn read(&self, reg: UsartReg) -> u32 {
            match reg {
                UsartReg::Sr => self.sr.get(),
                UsartReg::Dr => {
                    self.sr.set(self.sr.get() & !(SR_RXNE | SR_ORE));
                    self.rx_data.get()
                }
                UsartReg::Brr => self.brr.get(),
                UsartReg::Cr1 => self.cr1.get(),
                UsartReg::Cr2 => self.cr2.get(),
                UsartReg::Cr3 => self.cr3.get(),
            }
        }

        fn write(&self, reg: UsartReg, value: u32) {
            match reg {
                UsartReg::Sr => {}
                UsartReg::Dr => {
                    self.sent.borrow_mut().push(value as u8);
                    self.sr.set(self.sr.get() & !(SR_TXE | SR_TC));
                }
                UsartReg::Brr => self.brr.set(value),
                UsartReg::Cr1 => self.cr1.set(value),
                UsartReg::Cr2 => self.cr2.set(value),
                UsartReg::Cr3 => self.cr3.set(value),
            }
        }
    }

    fn config(tx_full: TxFullPolicy) -> SerialConfig {
        SerialConfig {
            tx_full,
            ..SerialConfig::default()
        }
    }

    #[test]
    fn brr_is_rounded() {
        // 45MHz / 115200 = 390.625
        assert_eq!(baud_rate_divisor(45_000_000, 115_200), Ok(391));
        assert_eq!(baud_rate_divisor(16_000_000, 9_600), Ok(1667));
        assert_eq!(baud_rate_divisor(45_000_000, 0), Err(Error::InvalidBaudRate(0)));
        assert_eq!(
            baud_rate_divisor(45_000_000, 5_000_000),
            Err(Error::InvalidBaudRate(5_000_000))
        );
        // pclk + baud / 2 が u32 に収まらなくても計算できる
        assert_eq!(baud_rate_divisor(u32::MAX, 115_200), Ok(37_283));
        assert_eq!(baud_rate_divisor(u32::MAX, 65_537), Ok(0xFFFF));
    }

    #[test]
    fn init_enables_receiver_transmitter_and_rx_interrupt() {
        let usart = FakeUsart::default();
        usart.cr1.set(CR1_M | CR1_TXEIE);
        let mut rx: RingBuffer<8> = RingBuffer::uninit();
        let mut tx: RingBuffer<8> = RingBuffer::uninit();
        let _ = port_init(&usart, &SerialConfig::default(), &mut rx, &mut tx).unwrap();

        assert_eq!(usart.cr1.get(), CR1_RXNEIE | CR1_RE | CR1_TE | CR1_UE);
        assert_eq!(usart.brr.get(), 391);
        assert_eq!(usart.cr2.get(), 0);
    }

    #[test]
    fn received_bytes_reach_the_task_in_order() {
        let usart = FakeUsart::default();
        let mut rx: RingBuffer<8> = RingBuffer::new();
        let mut tx: RingBuffer<8> = RingBuffer::new();
        let (mut port, mut isr) =
            port_init(&usart, &SerialConfig::default(), &mut rx, &mut tx).unwrap();

        assert_eq!(port.get_char(), None);
        for &b in b"hi!" {
            usart.receive(b);
            isr.on_interrupt();
        }
        assert_eq!(port.get_char(), Some(b'h'));
        assert_eq!(embedded_hal::serial::Read::read(&mut port), Ok(b'i'));
        assert_eq!(port.get_char(), Some(b'!'));
        assert_eq!(
            embedded_hal::serial::Read::read(&mut port),
            Err(nb::Error::WouldBlock)
        );
    }

    #[test]
    fn rx_overflow_drops_newest_bytes() {
        let usart = FakeUsart::default();
        let mut rx: RingBuffer<4> = RingBuffer::new();
        let mut tx: RingBuffer<4> = RingBuffer::new();
        let (mut port, mut isr) =
            port_init(&usart, &SerialConfig::default(), &mut rx, &mut tx).unwrap();

        for &b in b"abcdef" {
            usart.receive(b);
            isr.on_interrupt();
        }
        assert_eq!(port.rx_dropped(), 2);
        let got: Vec<u8> = core::iter::from_fn(|| port.get_char()).collect();
        assert_eq!(got, b"abcd");
    }

    #[test]
    fn hardware_overrun_is_cleared_and_counted() {
        let usart = FakeUsart::default();
        let mut rx: RingBuffer<4> = RingBuffer::new();
        let mut tx: RingBuffer<4> = RingBuffer::new();
        let (mut port, mut isr) =
            port_init(&usart, &SerialConfig::default(), &mut rx, &mut tx).unwrap();

        // 割り込みが間に合わず 2 バイト目を取りこぼした
        usart.receive(b'x');
        usart.receive(b'y');
        isr.on_interrupt();

        assert_eq!(usart.sr.get() & (SR_RXNE | SR_ORE), 0);
        assert_eq!(isr.hw_overruns(), 1);
        assert_eq!(port.get_char(), Some(b'x'));
        assert_eq!(port.get_char(), None);
    }

    #[test]
    fn tx_interrupt_drains_queue_and_stops() {
        let usart = FakeUsart::default();
        let mut rx: RingBuffer<8> = RingBuffer::new();
        let mut tx: RingBuffer<8> = RingBuffer::new();
        let (mut port, mut isr) =
            port_init(&usart, &SerialConfig::default(), &mut rx, &mut tx).unwrap();

        port.put_string("ok\n").unwrap();
        assert!(usart.cr1.get() & CR1_TXEIE != 0);
        assert_eq!(port.tx_pending(), 3);

        // TXE が立つたびに割り込みが 1 バイトずつ送る
        for _ in 0..4 {
            usart.shift_out();
            isr.on_interrupt();
        }
        assert_eq!(*usart.sent.borrow(), b"ok\n");
        assert_eq!(usart.cr1.get() & CR1_TXEIE, 0);
        assert_eq!(embedded_hal::serial::Write::flush(&mut port), Ok(()));
    }

    #[test]
    fn drop_policy_reports_full_tx_queue() {
        let usart = FakeUsart::default();
        let mut rx: RingBuffer<4> = RingBuffer::new();
        let mut tx: RingBuffer<4> = RingBuffer::new();
        let (mut port, _isr) =
            port_init(&usart, &config(TxFullPolicy::Drop), &mut rx, &mut tx).unwrap();

        assert_eq!(port.put_string("abcd"), Ok(()));
        assert_eq!(port.put_char(b'e'), Err(Error::TxFull));
        assert_eq!(port.put_string("fg"), Err(Error::TxFull));
        assert_eq!(port.tx_pending(), 4);
    }

    #[test]
    fn formatted_output_goes_through_the_queue() {
        use core::fmt::Write;

        let usart = FakeUsart::default();
        let mut rx: RingBuffer<4> = RingBuffer::new();
        let mut tx: RingBuffer<16> = RingBuffer::new();
        let (mut port, mut isr) =
            port_init(&usart, &config(TxFullPolicy::Drop), &mut rx, &mut tx).unwrap();

        write!(port, "pot={}\r\n", 1234).unwrap();
        while port.tx_pending() > 0 {
            usart.shift_out();
            isr.on_interrupt();
        }
        assert_eq!(*usart.sent.borrow(), b"pot=1234\r\n");
    }
}
