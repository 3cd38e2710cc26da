use crate::device::DeviceId;
use thiserror::Error;

/// アクチュエータのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("actuator initialization failed: {0}")]
    InitFailed(String),
    #[error("actuator control failed: {0}")]
    ControlFailed(String),
}

/// RGB 色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };
}

/// 動作パターン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationPattern {
    /// リレーを一定時間閉じる
    RelayPulse { duration_ms: u32, active_low: bool },
    /// LED ストリップ全体を点滅
    StripBlink {
        led_count: usize,
        color: Rgb,
        times: u32,
        interval_ms: u32,
    },
    /// ステータス LED の点滅（起動表示）
    StatusFlash { times: u32, interval_ms: u32 },
}

impl ActuationPattern {
    /// 1回の動作にかかる時間
    pub fn duration_ms(&self) -> u64 {
        match *self {
            ActuationPattern::RelayPulse { duration_ms, .. } => duration_ms as u64,
            ActuationPattern::StripBlink {
                times, interval_ms, ..
            }
            | ActuationPattern::StatusFlash { times, interval_ms } => {
                2 * times as u64 * interval_ms as u64
            }
        }
    }
}

/// かかし: リレー 500ms（アクティブロー）
pub const SCARECROW_RELAY: ActuationPattern = ActuationPattern::RelayPulse {
    duration_ms: 500,
    active_low: true,
};

/// 墓石: 10個の LED を赤で 150ms 間隔 20回点滅
pub const TOMBSTONE_BLINK: ActuationPattern = ActuationPattern::StripBlink {
    led_count: 10,
    color: Rgb::RED,
    times: 20,
    interval_ms: 150,
};

/// 起動時の LED 点滅
pub const STARTUP_FLASH: ActuationPattern = ActuationPattern::StatusFlash {
    times: 3,
    interval_ms: 100,
};

/// プロップごとのトリガー時の動作
pub fn trigger_pattern(id: DeviceId) -> ActuationPattern {
    match id {
        DeviceId::RipTombstone => TOMBSTONE_BLINK,
        DeviceId::Scarecrow => SCARECROW_RELAY,
    }
}

/// リレー・LED を動かすトレイト
///
/// `run` はパターンが終わるまでブロックします。
pub trait PropActuator: Send {
    fn run(&mut self, pattern: &ActuationPattern) -> Result<(), ActuatorError>;
}

#[cfg(not(feature = "esp"))]
pub use mock::MockActuator;

#[cfg(not(feature = "esp"))]
mod mock {
    use super::{ActuationPattern, ActuatorError, PropActuator};
    use std::sync::{Arc, Mutex};

    /// テスト用のアクチュエータモック
    #[derive(Debug, Clone, Default)]
    pub struct MockActuator {
        pub runs: Arc<Mutex<Vec<ActuationPattern>>>,
        pub simulate_error: Arc<Mutex<bool>>,
    }

    impl MockActuator {
        pub fn new() -> Self {
            Self::default()
        }

        /// テスト用: 実行したパターンを取得
        pub fn runs(&self) -> Vec<ActuationPattern> {
            self.runs.lock().unwrap().clone()
        }

        pub fn set_error(&self, enable: bool) {
            *self.simulate_error.lock().unwrap() = enable;
        }
    }

    impl PropActuator for MockActuator {
        fn run(&mut self, pattern: &ActuationPattern) -> Result<(), ActuatorError> {
            if *self.simulate_error.lock().unwrap() {
                return Err(ActuatorError::ControlFailed("Simulated actuator error".to_string()));
            }
            self.runs.lock().unwrap().push(*pattern);
            Ok(())
        }
    }
}
