// 押しボタンのデバウンス用ステートマシン
//
// 一定周期 (50ms) ごとにボタンの状態を 1 回サンプリングして tick() に渡す。
//
//   状態       | 入力 1                                    | 入力 0
//   -----------+-------------------------------------------+---------------------------
//   Idle       | -> Pending                                | そのまま
//   Pending    | -> Single                                 | -> Idle（チャタリングとして無視）
//   Single     | 閾値に達したら -> Repeating、未満なら留まる | 単押しを通知して -> Idle
//   Repeating  | 4 ティックごとにリピートを通知             | -> Idle
//
// 状態遷移では必ず「今の状態の exit -> 状態の更新 -> 次の状態の entry」の順に実行する。

use embedded_hal::digital::v2::InputPin;

use crate::config::DebounceConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Pending,
    Single,
    Repeating,
}

/// デバウンス後のボタンイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// リピート閾値に達する前に離された
    SinglePress,
    /// 押しっぱなし（Repeating に入った時と、その後一定間隔ごと）
    Repeat,
}

pub struct Debouncer {
    state: State,
    ticks_in_state: u32,
    config: DebounceConfig,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Result<Self> {
        if config.repeat_threshold == 0 || config.repeat_interval == 0 {
            return Err(Error::InvalidThreshold);
        }
        Ok(Self {
            state: State::Idle,
            ticks_in_state: 0,
            config,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn ticks_in_state(&self) -> u32 {
        self.ticks_in_state
    }

    /// 1 ティック分のサンプル (true = 押されている) を処理する
    pub fn tick(&mut self, pressed: bool) -> Option<ButtonEvent> {
        let (next, mut event) = self.handle(pressed);

        if let Some(next) = next {
            self.exit();
            self.state = next;
            if let Some(entered) = self.enter() {
                event = Some(entered);
            }
        }

        event
    }

    // 状態ごとのイベントハンドラ。(遷移先, 通知) を返す。遷移しないときは None
    fn handle(&mut self, pressed: bool) -> (Option<State>, Option<ButtonEvent>) {
        match (self.state, pressed) {
            (State::Idle, true) => (Some(State::Pending), None),
            (State::Idle, false) => (None, None),

            // もう一度押されていれば本物の押下
            (State::Pending, true) => (Some(State::Single), None),
            (State::Pending, false) => (Some(State::Idle), None),

            (State::Single, true) => {
                self.ticks_in_state = self.ticks_in_state.wrapping_add(1);
                if self.ticks_in_state >= self.config.repeat_threshold {
                    (Some(State::Repeating), None)
                } else {
                    (None, None)
                }
            }
            // 押下として認識されたがリピートには届かなかった
            (State::Single, false) => (Some(State::Idle), Some(ButtonEvent::SinglePress)),

            (State::Repeating, true) => {
                self.ticks_in_state = self.ticks_in_state.wrapping_add(1);
                if self.ticks_in_state % self.config.repeat_interval == 0 {
                    (None, Some(ButtonEvent::Repeat))
                } else {
                    (None, None)
                }
            }
            (State::Repeating, false) => (Some(State::Idle), None),
        }
    }

    fn enter(&mut self) -> Option<ButtonEvent> {
        match self.state {
            State::Idle | State::Pending => None,
            State::Single => {
                self.ticks_in_state = 0;
                None
            }
            State::Repeating => {
                self.ticks_in_state = 0;
                Some(ButtonEvent::Repeat)
            }
        }
    }

    // どの状態も exit での処理はない
    fn exit(&mut self) {}
}

/// ボタン入力とステートマシンをまとめたデバウンスタスクの本体
/// 周期待ちと通知の送り先はスケジューラ側が持つ
pub struct DebounceTask<P> {
    pin: P,
    active_low: bool,
    machine: Debouncer,
}

/// デバウンスタスクを作る（ステートマシンは Idle から始まる）
pub fn debounce_task_init<P: InputPin>(pin: P, config: DebounceConfig) -> Result<DebounceTask<P>> {
    Ok(DebounceTask {
        pin,
        active_low: config.active_low,
        machine: Debouncer::new(config)?,
    })
}

impl<P: InputPin> DebounceTask<P> {
    /// ボタンを 1 回読んでステートマシンを 1 ティック進める
    pub fn poll(&mut self) -> core::result::Result<Option<ButtonEvent>, P::Error> {
        let pressed = if self.active_low {
            self.pin.is_low()?
        } else {
            self.pin.is_high()?
        };
        Ok(self.machine.tick(pressed))
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }
}
