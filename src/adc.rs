// ポテンショメータ用 ADC の割り込み駆動パイプライン
//
// タスクが trigger_conversion() で 1 回だけ変換を開始し、変換完了 (EOC) 割り込みで
// 値を読み出して LPF に通し、その結果をタスクへ渡す。1 トリガーにつき 1 回割り込みが入る
// 前提なので、変換中に再トリガーするのは使い方の誤り (assert で止める)。
//
// レジスタレイアウトは STM32F4/F7 の ADC1~3 共通。

use embedded_hal::blocking::delay::DelayUs;

use crate::config::PotConfig;
use crate::error::{Error, Result};
use crate::filter::LowPassFilter;
use crate::register::{bit, Field};

/// ADC のレジスタ（ADC_CCR だけは共通レジスタ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcReg {
    Sr,
    Cr1,
    Cr2,
    Smpr1,
    Smpr2,
    Sqr1,
    Sqr3,
    Dr,
    Ccr,
}

/// ADC のレジスタを 32bit 単位で読み書きする手段
/// 実機では PAC のレジスタブロック、テストでは偽物を差し込む
pub trait AdcRegisters {
    fn read(&self, reg: AdcReg) -> u32;
    fn write(&self, reg: AdcReg, value: u32);

    fn modify<F: FnOnce(u32) -> u32>(&self, reg: AdcReg, f: F) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

impl<T: AdcRegisters + ?Sized> AdcRegisters for &T {
    fn read(&self, reg: AdcReg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: AdcReg, value: u32) {
        (**self).write(reg, value)
    }
}

// ADC_SR
pub const SR_EOC: u32 = bit(1);
pub const SR_STRT: u32 = bit(4);
pub const SR_OVR: u32 = bit(5);

// ADC_CR1
pub const CR1_EOCIE: u32 = bit(5);
pub const CR1_SCAN: u32 = bit(8);
pub const CR1_DISCEN: u32 = bit(11);
pub const CR1_RES: Field = Field::new(24, 2);
pub const CR1_OVRIE: u32 = bit(26);

// ADC_CR2
pub const CR2_ADON: u32 = bit(0);
pub const CR2_CONT: u32 = bit(1);
pub const CR2_DMA: u32 = bit(8);
pub const CR2_DDS: u32 = bit(9);
pub const CR2_EOCS: u32 = bit(10);
pub const CR2_ALIGN: u32 = bit(11);
pub const CR2_EXTSEL: Field = Field::new(24, 4);
pub const CR2_EXTEN: Field = Field::new(28, 2);
pub const CR2_SWSTART: u32 = bit(30);

// ADC_SQR1: 変換数 - 1
pub const SQR1_L: Field = Field::new(20, 4);
// ADC_SQR3: 1 番目に変換するチャンネル
pub const SQR3_SQ1: Field = Field::new(0, 5);
// ADC_CCR: ADC クロックのプリスケーラ
pub const CCR_ADCPRE: Field = Field::new(16, 2);
// ADC_DR: 12bit 右詰め
pub const DR_DATA: Field = Field::new(0, 12);

// 0~15 が外部入力、16~18 が内部（温度センサ、VREFINT、VBAT）
const MAX_CHANNEL: u8 = 18;

// SMPRx の各チャンネル 3bit
fn sample_time_field(channel: u8) -> (AdcReg, Field) {
    if channel < 10 {
        (AdcReg::Smpr2, Field::new(channel * 3, 3))
    } else {
        (AdcReg::Smpr1, Field::new((channel - 10) * 3, 3))
    }
}

/// 1 回の変換結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub raw: u16,
    pub filtered: u16,
}

/// ADC を単発変換・割り込みありで初期化し、タスク側と割り込み側のハンドルを返す
///
/// 割り込みコントローラ (NVIC) 側の許可は呼び出し側で行うこと。
pub fn pot_init<R, D, const N: usize>(
    regs: R,
    config: &PotConfig,
    delay: &mut D,
) -> Result<(PotTrigger<R>, PotIsr<R, N>)>
where
    R: AdcRegisters + Clone,
    D: DelayUs<u32>,
{
    if config.channel > MAX_CHANNEL {
        return Err(Error::InvalidChannel(config.channel));
    }

    configure_converter(&regs, config);
    configure_channel(&regs, config);
    enable(&regs, config, delay);

    Ok((
        PotTrigger { regs: regs.clone() },
        PotIsr {
            regs,
            filter: LowPassFilter::new(),
            overruns: 0,
        },
    ))
}

fn configure_converter<R: AdcRegisters>(regs: &R, config: &PotConfig) {
    // ADC クロックのプリスケーラ (PCLK2 を分周)
    regs.modify(AdcReg::Ccr, |r| CCR_ADCPRE.set(r, config.prescaler as u32));

    // スキャンなし、12bit 分解能、不連続モードなし
    regs.modify(AdcReg::Cr1, |r| {
        CR1_RES.set(r & !(CR1_SCAN | CR1_DISCEN), 0)
    });

    // 右詰め、外部トリガーなし、単発変換、DMA なし、EOC は変換シーケンスごと
    regs.modify(AdcReg::Cr2, |r| {
        let r = r & !(CR2_ALIGN | CR2_CONT | CR2_DMA | CR2_DDS | CR2_EOCS);
        CR2_EXTEN.set(CR2_EXTSEL.set(r, 0), 0)
    });

    // 変換数は 1
    regs.modify(AdcReg::Sqr1, |r| SQR1_L.set(r, 1 - 1));
}

fn configure_channel<R: AdcRegisters>(regs: &R, config: &PotConfig) {
    let (smpr, field) = sample_time_field(config.channel);
    regs.modify(smpr, |r| field.set(r, config.sample_time as u32));

    // 1 番目の変換にチャンネルを割り当て
    regs.modify(AdcReg::Sqr3, |r| SQR3_SQ1.set(r, u32::from(config.channel)));
}

fn enable<R: AdcRegisters, D: DelayUs<u32>>(regs: &R, config: &PotConfig, delay: &mut D) {
    regs.modify(AdcReg::Cr2, |r| r | CR2_ADON);

    // 電源投入後の安定待ち (tSTAB)
    delay.delay_us(config.stabilization_us);

    assert!(regs.read(AdcReg::Cr2) & CR2_ADON != 0, "adc not powered on");

    // OVR と EOC をクリア (rc_w0 なので 0 を書いた bit だけ落ちる)
    regs.write(AdcReg::Sr, !(SR_OVR | SR_EOC));

    // オーバーランと変換完了の割り込みを有効化
    regs.modify(AdcReg::Cr1, |r| r | CR1_OVRIE | CR1_EOCIE);
}

/// タスク側：変換開始だけを行う
pub struct PotTrigger<R> {
    regs: R,
}

impl<R: AdcRegisters> PotTrigger<R> {
    /// 変換を 1 回開始する
    ///
    /// 前回の変換のステータス (OVR, STRT, EOC) が残っていたら panic する。
    pub fn trigger_conversion(&mut self) {
        let sr = self.regs.read(AdcReg::Sr);
        assert!(
            sr & (SR_OVR | SR_STRT | SR_EOC) == 0,
            "adc conversion already pending (SR = {:#x})",
            sr
        );

        self.regs.modify(AdcReg::Cr2, |r| r | CR2_SWSTART);
    }
}

/// 割り込み側：変換結果の読み出しとフィルタ
pub struct PotIsr<R, const N: usize> {
    regs: R,
    filter: LowPassFilter<N>,
    overruns: u32,
}

impl<R: AdcRegisters, const N: usize> PotIsr<R, N> {
    /// ADC 割り込みから呼ぶ。変換が完了していればフィルタ後の値を返す
    pub fn on_end_of_conversion(&mut self) -> Option<Sample> {
        let sample = if self.regs.read(AdcReg::Sr) & SR_EOC != 0 {
            // DR を読むと EOC も自動でクリアされる
            let raw = DR_DATA.get(self.regs.read(AdcReg::Dr)) as u16;
            let filtered = self.filter.update(raw);
            Some(Sample { raw, filtered })
        } else {
            None
        };

        // 変換開始フラグと EOC をクリア
        self.regs.write(AdcReg::Sr, !(SR_STRT | SR_EOC));

        // オーバーランが起きていて、かつその割り込みが有効ならクリア
        let overrun = self.regs.read(AdcReg::Sr) & SR_OVR != 0;
        let overrun_enabled = self.regs.read(AdcReg::Cr1) & CR1_OVRIE != 0;
        if overrun && overrun_enabled {
            self.regs.write(AdcReg::Sr, !SR_OVR);
            self.overruns = self.overruns.wrapping_add(1);
        }

        sample
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn filter(&self) -> &LowPassFilter<N> {
        &self.filter
    }
}
