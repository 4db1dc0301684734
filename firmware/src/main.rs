// 割り込みとタスクの連携サンプル (NUCLEO-F446RE)
//
// - ADC1 (PA4, channel 4) のポテンショメータを 125ms ごとに変換し、変換完了割り込みで
//   LPF を通した値をタスクへ渡す。値に応じてアラームレベルを判定する。
// - ユーザスイッチ B1 (PC13) を 50ms ごとにサンプリングしてデバウンスし、
//   単押しで LD2 (PA5) を反転、長押しでリピート回数を数える。
// - USART2 (ST-Link の仮想 COM ポート, 115200bps) で受信した文字をエコーし、
//   ポテンショメータの値を出力する。送受信ともに割り込み + リングバッファ。
//
// ログは semihosting 経由（デバッガ接続が必要）

#![no_std]
#![no_main]

// pick a panicking behavior
use panic_halt as _; // you can put a breakpoint on `rust_begin_unwind` to catch panics
                     // use panic_semihosting as _; // logs messages to the host stderr; requires a debugger

mod board;

use core::sync::atomic::AtomicU32;

// 割り込みで捨てたサンプル数（ADC 割り込み -> ADC タスク）
static DROPPED_SAMPLES: AtomicU32 = AtomicU32::new(0);
// USART のハードウェアオーバーラン回数（USART 割り込み -> コンソールタスク）
static UART_OVERRUNS: AtomicU32 = AtomicU32::new(0);

// 割り込みベクタは stm32f4 の "rt" features で登録される
#[rtic::app(device = stm32f4::stm32f446, peripherals = true, dispatchers = [SPI1, SPI2, SPI3])]
mod app {
    use super::{board, DROPPED_SAMPLES, UART_OVERRUNS};

    use core::fmt::Write;
    use core::sync::atomic::Ordering;

    use cortex_m_semihosting::hprintln;
    use rtic_monotonics::systick::prelude::*;
    use rtic_sync::{
        channel::{Receiver, Sender},
        make_channel,
    };
    use stm32f4xx_hal::gpio::{Floating, Input, Output, PushPull, PA5, PC13};
    use stm32f4xx_hal::prelude::*;

    use stm32_isr_pipeline::config::{
        AlarmThresholds, DebounceConfig, PotConfig, SerialConfig, ADC_PERIOD_MS,
        DEBOUNCE_TICK_MS, LPF_SIZE, RX_BUFFER_SIZE, SYSCLK_HZ, TX_BUFFER_SIZE,
    };
    use stm32_isr_pipeline::{
        debounce_task_init, port_init, pot_init, AlarmMonitor, ButtonEvent, DebounceTask,
        PotIsr, PotTrigger, RingBuffer, Sample, SerialIsr, SerialPort,
    };

    systick_monotonic!(Mono, 1000);

    // ADC 割り込みからタスクへは最新の 1 サンプルだけを渡す
    const SAMPLE_QUEUE: usize = 1;
    const BUTTON_QUEUE: usize = 4;
    const CONSOLE_POLL_MS: u32 = 10;

    type Serial = SerialPort<'static, board::Usart2, RX_BUFFER_SIZE, TX_BUFFER_SIZE>;

    #[shared]
    struct Shared {
        serial: Serial,
    }

    #[local]
    struct Local {
        trigger: PotTrigger<board::Adc1>,
        pot_isr: PotIsr<board::Adc1, LPF_SIZE>,
        sample_tx: Sender<'static, Sample, SAMPLE_QUEUE>,
        serial_isr: SerialIsr<'static, board::Usart2, RX_BUFFER_SIZE, TX_BUFFER_SIZE>,
        button: DebounceTask<PC13<Input<Floating>>>,
        led: PA5<Output<PushPull>>,
        alarm: AlarmMonitor,
    }

    #[init(local = [
        rx_buf: RingBuffer<RX_BUFFER_SIZE> = RingBuffer::new(),
        tx_buf: RingBuffer<TX_BUFFER_SIZE> = RingBuffer::new()
    ])]
    fn init(cx: init::Context) -> (Shared, Local) {
        let peripheral = cx.device;

        board::config_clock(&peripheral.RCC, &peripheral.FLASH);
        board::enable_peripheral_clocks(&peripheral.RCC);

        let gpioa = peripheral.GPIOA.split();
        let gpioc = peripheral.GPIOC.split();

        // PA4: ADC1_IN4
        let _pot = gpioa.pa4.into_analog();
        // PA2: USART2_TX, PA3: USART2_RX (AF7)
        let _tx = gpioa.pa2.into_alternate::<7>();
        let _rx = gpioa.pa3.into_alternate::<7>();
        // GPIOA-5 が LD2 に接続されている
        let mut led = gpioa.pa5.into_push_pull_output();
        led.set_low();
        // GPIOC-13 が ユーザスイッチ B1 に接続されている（押すと L）
        let button = gpioc.pc13.into_floating_input();

        let mut delay = board::CycleDelay { sysclk_hz: SYSCLK_HZ };
        let (trigger, pot_isr) =
            pot_init::<_, _, LPF_SIZE>(board::Adc1, &PotConfig::default(), &mut delay)
                .unwrap_or_else(|e| panic!("adc init: {}", e));

        let (serial, serial_isr) = port_init(
            board::Usart2,
            &SerialConfig::default(),
            cx.local.rx_buf,
            cx.local.tx_buf,
        )
        .unwrap_or_else(|e| panic!("usart init: {}", e));

        let button = debounce_task_init(button, DebounceConfig::default())
            .unwrap_or_else(|e| panic!("debounce init: {}", e));
        let alarm = AlarmMonitor::new(AlarmThresholds::default())
            .unwrap_or_else(|e| panic!("alarm init: {}", e));

        Mono::start(cx.core.SYST, SYSCLK_HZ);

        let (sample_tx, sample_rx) = make_channel!(Sample, SAMPLE_QUEUE);
        let (single_tx, single_rx) = make_channel!(ButtonEvent, BUTTON_QUEUE);
        let (repeat_tx, repeat_rx) = make_channel!(ButtonEvent, BUTTON_QUEUE);

        // init からの spawn は必ず成功する（どのタスクもまだ動いていない）
        adc_task::spawn(sample_rx).ok();
        debounce_task::spawn(single_tx, repeat_tx).ok();
        single_press_task::spawn(single_rx).ok();
        repeat_task::spawn(repeat_rx).ok();
        console_task::spawn().ok();

        hprintln!("pipeline started: sysclk {} Hz", SYSCLK_HZ).ok();

        (
            Shared { serial },
            Local {
                trigger,
                pot_isr,
                sample_tx,
                serial_isr,
                button,
                led,
                alarm,
            },
        )
    }

    // 割り込みは全てのソフトウェアタスクより高い優先度で動かす
    #[task(binds = ADC, priority = 3, local = [pot_isr, sample_tx])]
    fn adc_isr(cx: adc_isr::Context) {
        if let Some(sample) = cx.local.pot_isr.on_end_of_conversion() {
            // タスクが前のサンプルを受け取っていなければ新しい方を捨てる
            if cx.local.sample_tx.try_send(sample).is_err() {
                DROPPED_SAMPLES.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[task(binds = USART2, priority = 3, local = [serial_isr])]
    fn usart2_isr(cx: usart2_isr::Context) {
        let isr = cx.local.serial_isr;
        isr.on_interrupt();
        UART_OVERRUNS.store(isr.hw_overruns(), Ordering::Relaxed);
    }

    // 125ms ごとに 1 回変換し、結果を待ってアラーム判定とコンソール出力
    #[task(priority = 1, local = [trigger, alarm], shared = [serial])]
    async fn adc_task(
        mut cx: adc_task::Context,
        mut samples: Receiver<'static, Sample, SAMPLE_QUEUE>,
    ) {
        loop {
            Mono::delay(ADC_PERIOD_MS.millis()).await;

            cx.local.trigger.trigger_conversion();
            let sample = match samples.recv().await {
                Ok(sample) => sample,
                Err(_) => {
                    hprintln!("adc: interrupt side is gone").ok();
                    return;
                }
            };

            if let Some(level) = cx.local.alarm.update(sample.filtered) {
                hprintln!("alarm: {:?} (flag {:#06b})", level, level.bits()).ok();
            }

            let dropped = DROPPED_SAMPLES.swap(0, Ordering::Relaxed);
            if dropped != 0 {
                hprintln!("adc: {} samples dropped", dropped).ok();
            }

            cx.shared.serial.lock(|serial| {
                write!(serial, "pot raw={} lpf={}\r\n", sample.raw, sample.filtered).ok();
            });
        }
    }

    // 50ms ごとに B1 をサンプリングしてステートマシンを進める
    #[task(priority = 1, local = [button])]
    async fn debounce_task(
        cx: debounce_task::Context,
        mut single: Sender<'static, ButtonEvent, BUTTON_QUEUE>,
        mut repeat: Sender<'static, ButtonEvent, BUTTON_QUEUE>,
    ) {
        loop {
            Mono::delay(DEBOUNCE_TICK_MS.millis()).await;

            let event = match cx.local.button.poll() {
                Ok(event) => event,
                Err(never) => match never {},
            };
            // 受け手が詰まっていたらそのイベントは諦める
            let sent = match event {
                Some(ev @ ButtonEvent::SinglePress) => single.try_send(ev).is_ok(),
                Some(ev @ ButtonEvent::Repeat) => repeat.try_send(ev).is_ok(),
                None => true,
            };
            if !sent {
                hprintln!("sw: event dropped").ok();
            }
        }
    }

    #[task(priority = 1, local = [led])]
    async fn single_press_task(
        cx: single_press_task::Context,
        mut events: Receiver<'static, ButtonEvent, BUTTON_QUEUE>,
    ) {
        while events.recv().await.is_ok() {
            cx.local.led.toggle();
            hprintln!("sw: single press").ok();
        }
    }

    #[task(priority = 1, local = [count: u32 = 0])]
    async fn repeat_task(
        cx: repeat_task::Context,
        mut events: Receiver<'static, ButtonEvent, BUTTON_QUEUE>,
    ) {
        while events.recv().await.is_ok() {
            *cx.local.count += 1;
            hprintln!("sw: repeat {}", cx.local.count).ok();
        }
    }

    // 受信した文字をそのまま送り返す
    #[task(priority = 1, local = [rx_dropped: usize = 0, overruns: u32 = 0], shared = [serial])]
    async fn console_task(mut cx: console_task::Context) {
        loop {
            Mono::delay(CONSOLE_POLL_MS.millis()).await;

            let rx_dropped = cx.shared.serial.lock(|serial| {
                while let Some(c) = serial.get_char() {
                    serial.put_char(c).ok();
                }
                serial.rx_dropped()
            });

            if rx_dropped != *cx.local.rx_dropped {
                *cx.local.rx_dropped = rx_dropped;
                hprintln!("uart: {} bytes dropped (rx buffer full)", rx_dropped).ok();
            }
            let overruns = UART_OVERRUNS.load(Ordering::Relaxed);
            if overruns != *cx.local.overruns {
                *cx.local.overruns = overruns;
                hprintln!("uart: {} hardware overruns", overruns).ok();
            }
        }
    }
}
