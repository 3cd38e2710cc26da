/// 壁時計の抽象化
///
/// コーディネータとプロップはゲートウェイから受け取った UNIX 時刻で時計を合わせます。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("setting the wall clock is not supported on this target")]
    Unsupported,
    #[error("settimeofday failed with code {0}")]
    SetFailed(i32),
}

/// 読み書きできる壁時計
pub trait WallClock: Send + Sync {
    /// 現在の UNIX 時刻（秒）
    fn now_unix(&self) -> u64;

    /// 時計を合わせる
    fn set_unix(&self, unix: u64) -> Result<(), ClockError>;
}

/// OS の時計
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    #[cfg(feature = "esp")]
    fn set_unix(&self, unix: u64) -> Result<(), ClockError> {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: unix as _,
            tv_usec: 0,
        };
        let result = unsafe { esp_idf_svc::sys::settimeofday(&tv, std::ptr::null()) };
        if result == 0 {
            Ok(())
        } else {
            Err(ClockError::SetFailed(result))
        }
    }

    #[cfg(not(feature = "esp"))]
    fn set_unix(&self, _unix: u64) -> Result<(), ClockError> {
        Err(ClockError::Unsupported)
    }
}

/// 手動で進める時計（ホスト・テスト用）
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(unix: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(unix)),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn set_unix(&self, unix: u64) -> Result<(), ClockError> {
        self.now.store(unix, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now_unix(), 1_005);
        other.set_unix(42).unwrap();
        assert_eq!(clock.now_unix(), 42);
    }
}
