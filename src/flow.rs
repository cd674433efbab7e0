//! RTT 기반 흐름 제어
//!
//! Good/Bad 두 상태의 히스테리시스 루프.
//! - Bad → Good: 좋은 상태가 penalty_time 보다 오래 유지되어야 함
//! - Good → Bad: RTT 임계값 초과 즉시
//! - 짧게 유지된 Good 에서 떨어지면 penalty_time 두 배 (최대 60초)
//! - Good 이 10초 유지될 때마다 penalty_time 절반 (최소 1초)

use tracing::info;

/// RTT 임계값 (밀리초)
pub const RTT_THRESHOLD_MS: f64 = 250.0;

/// Good 상태 전송률 (슬롯/초)
pub const GOOD_SEND_RATE: f64 = 30.0;

/// Bad 상태 전송률 (슬롯/초)
pub const BAD_SEND_RATE: f64 = 10.0;

/// 초기 penalty_time (초)
pub const INITIAL_PENALTY_TIME: f64 = 4.0;

/// penalty_time 하한 (초)
pub const MIN_PENALTY_TIME: f64 = 1.0;

/// penalty_time 상한 (초)
pub const MAX_PENALTY_TIME: f64 = 60.0;

/// penalty 증감의 기준 시간 (초)
const PENALTY_WINDOW: f64 = 10.0;

/// 흐름 제어 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Good,
    Bad,
}

/// 흐름 제어기 (연결당 하나)
#[derive(Debug, Clone)]
pub struct FlowControl {
    mode: FlowMode,
    penalty_time: f64,
    good_conditions_time: f64,
    penalty_reduction_accumulator: f64,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            mode: FlowMode::Bad,
            penalty_time: INITIAL_PENALTY_TIME,
            good_conditions_time: 0.0,
            penalty_reduction_accumulator: 0.0,
        }
    }

    /// 초기 상태로 복원 (연결 끊김 시 호출)
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 틱마다 호출
    ///
    /// `delta_time` 은 초, `rtt_ms` 는 밀리초.
    pub fn update(&mut self, delta_time: f64, rtt_ms: f64) {
        if self.mode == FlowMode::Good {
            if rtt_ms > RTT_THRESHOLD_MS {
                info!("*** dropping to bad mode ***");
                self.mode = FlowMode::Bad;
                if self.good_conditions_time < PENALTY_WINDOW && self.penalty_time < MAX_PENALTY_TIME {
                    self.penalty_time = (self.penalty_time * 2.0).min(MAX_PENALTY_TIME);
                    info!("penalty time increased to {:.1}", self.penalty_time);
                }
                self.good_conditions_time = 0.0;
                self.penalty_reduction_accumulator = 0.0;
                return;
            }

            self.good_conditions_time += delta_time;
            self.penalty_reduction_accumulator += delta_time;

            if self.penalty_reduction_accumulator > PENALTY_WINDOW && self.penalty_time > MIN_PENALTY_TIME {
                self.penalty_time = (self.penalty_time / 2.0).max(MIN_PENALTY_TIME);
                info!("penalty time reduced to {:.1}", self.penalty_time);
                self.penalty_reduction_accumulator = 0.0;
            }
            return;
        }

        if rtt_ms <= RTT_THRESHOLD_MS {
            self.good_conditions_time += delta_time;
        } else {
            self.good_conditions_time = 0.0;
        }

        if self.good_conditions_time > self.penalty_time {
            info!("*** upgrading to good mode ***");
            self.good_conditions_time = 0.0;
            self.penalty_reduction_accumulator = 0.0;
            self.mode = FlowMode::Good;
        }
    }

    /// 권장 전송률 (슬롯/초)
    pub fn send_rate(&self) -> f64 {
        match self.mode {
            FlowMode::Good => GOOD_SEND_RATE,
            FlowMode::Bad => BAD_SEND_RATE,
        }
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn penalty_time(&self) -> f64 {
        self.penalty_time
    }

    pub fn good_conditions_time(&self) -> f64 {
        self.good_conditions_time
    }

    pub fn penalty_reduction_accumulator(&self) -> f64 {
        self.penalty_reduction_accumulator
    }
}
