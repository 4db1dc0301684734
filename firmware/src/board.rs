// NUCLEO-F446RE 固有の部分
// クロック設定、ペリフェラルへのクロック供給、ライブラリのレジスタ trait の実装

use stm32_isr_pipeline::{AdcReg, AdcRegisters, UsartReg, UsartRegisters};
use stm32f4::stm32f446;

// クロックの初期設定を実施
// SYSCLK: HSE(ST-Link 8MHz) -> PLL -> 180MHz
// APB1: 45MHz (USART2)
// APB2: 90MHz (ADC1)
pub fn config_clock(rcc: &stm32f446::RCC, flash: &stm32f446::FLASH) {
    // HSEはBypassモード(ST-Linkからの 8 MHz を使える)
    rcc.cr.modify(|_, w| w.hsebyp().bypassed());
    // HSE ON
    rcc.cr.modify(|_, w| w.hseon().on());
    // HSE の準備完了待ち
    while rcc.cr.read().hserdy().is_not_ready() {}

    // PLL の ソースクロックをHSEとし、8MHz / 4 = 2MHz を 180 倍して 360MHz
    rcc.pllcfgr.modify(|_, w| w.pllsrc().hse());
    rcc.pllcfgr.modify(|_, w| unsafe { w.pllm().bits(4) });
    rcc.pllcfgr.modify(|_, w| unsafe { w.plln().bits(180) });
    // P を 2 分周して 180MHz
    rcc.pllcfgr.modify(|_, w| w.pllp().div2());

    // PLL ON
    rcc.cr.modify(|_, w| w.pllon().on());
    // PLL の準備完了待ち
    while rcc.cr.read().pllrdy().is_not_ready() {}

    // フラッシュの読み出し遅延設定（180MHzだと5WS）
    flash.acr.modify(|_, w| w.latency().ws5());

    // APB の分周はシステムクロックを切り替える前に済ませておく
    // APB1を分周（最大45MHz）
    rcc.cfgr.modify(|_, w| w.ppre1().div4());
    // APB2を分周（最大90MHz）
    rcc.cfgr.modify(|_, w| w.ppre2().div2());

    // PLLPをシステムクロックとして使う設定
    rcc.cfgr.modify(|_, w| w.sw().pll());
    while !rcc.cfgr.read().sws().is_pll() {}
}

// 各機能へのクロック入力設定
// GPIO は HAL の split() が自分で供給する
pub fn enable_peripheral_clocks(rcc: &stm32f446::RCC) {
    rcc.apb2enr.modify(|_, w| w.adc1en().enabled()); // ADC1
    rcc.apb1enr.modify(|_, w| w.usart2en().enabled()); // USART2 (ST-Link の仮想 COM ポート)
}

/// ADC1 + ADC 共通レジスタ
///
/// レジスタブロックはアドレスで直接触る。ADC1 を使うのはこの型だけにすること。
#[derive(Clone, Copy)]
pub struct Adc1;

impl AdcRegisters for Adc1 {
    fn read(&self, reg: AdcReg) -> u32 {
        let adc = unsafe { &*stm32f446::ADC1::ptr() };
        match reg {
            AdcReg::Sr => adc.sr.read().bits(),
            AdcReg::Cr1 => adc.cr1.read().bits(),
            AdcReg::Cr2 => adc.cr2.read().bits(),
            AdcReg::Smpr1 => adc.smpr1.read().bits(),
            AdcReg::Smpr2 => adc.smpr2.read().bits(),
            AdcReg::Sqr1 => adc.sqr1.read().bits(),
            AdcReg::Sqr3 => adc.sqr3.read().bits(),
            AdcReg::Dr => adc.dr.read().bits(),
            AdcReg::Ccr => unsafe { &*stm32f446::ADC_COMMON::ptr() }.ccr.read().bits(),
        }
    }

    fn write(&self, reg: AdcReg, value: u32) {
        let adc = unsafe { &*stm32f446::ADC1::ptr() };
        match reg {
            AdcReg::Sr => adc.sr.write(|w| unsafe { w.bits(value) }),
            AdcReg::Cr1 => adc.cr1.write(|w| unsafe { w.bits(value) }),
            AdcReg::Cr2 => adc.cr2.write(|w| unsafe { w.bits(value) }),
            AdcReg::Smpr1 => adc.smpr1.write(|w| unsafe { w.bits(value) }),
            AdcReg::Smpr2 => adc.smpr2.write(|w| unsafe { w.bits(value) }),
            AdcReg::Sqr1 => adc.sqr1.write(|w| unsafe { w.bits(value) }),
            AdcReg::Sqr3 => adc.sqr3.write(|w| unsafe { w.bits(value) }),
            // 読み出し専用
            AdcReg::Dr => {}
            AdcReg::Ccr => unsafe { &*stm32f446::ADC_COMMON::ptr() }
                .ccr
                .write(|w| unsafe { w.bits(value) }),
        }
    }
}

/// USART2 (PA2: TX, PA3: RX)
#[derive(Clone, Copy)]
pub struct Usart2;

impl UsartRegisters for Usart2 {
    fn read(&self, reg: UsartReg) -> u32 {
        let usart = unsafe { &*stm32f446::USART2::ptr() };
        match reg {
            UsartReg::Sr => usart.sr.read().bits(),
            UsartReg::Dr => usart.dr.read().bits(),
            UsartReg::Brr => usart.brr.read().bits(),
            UsartReg::Cr1 => usart.cr1.read().bits(),
            UsartReg::Cr2 => usart.cr2.read().bits(),
            UsartReg::Cr3 => usart.cr3.read().bits(),
        }
    }

    fn write(&self, reg: UsartReg, value: u32) {
        let usart = unsafe { &*stm32f446::USART2::ptr() };
        match reg {
            UsartReg::Sr => usart.sr.write(|w| unsafe { w.bits(value) }),
            UsartReg::Dr => usart.dr.write(|w| unsafe { w.bits(value) }),
            UsartReg::Brr => usart.brr.write(|w| unsafe { w.bits(value) }),
            UsartReg::Cr1 => usart.cr1.write(|w| unsafe { w.bits(value) }),
            UsartReg::Cr2 => usart.cr2.write(|w| unsafe { w.bits(value) }),
            UsartReg::Cr3 => usart.cr3.write(|w| unsafe { w.bits(value) }),
        }
    }
}

/// コアのサイクル数で待つだけの遅延（ADC の安定待ち程度の短い待ち用）
pub struct CycleDelay {
    pub sysclk_hz: u32,
}

impl embedded_hal::blocking::delay::DelayUs<u32> for CycleDelay {
    fn delay_us(&mut self, us: u32) {
        cortex_m::asm::delay((self.sysclk_hz / 1_000_000).saturating_mul(us));
    }
}
