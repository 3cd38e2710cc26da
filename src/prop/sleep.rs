use chrono::{DateTime, Timelike, TimeZone, Utc};
use chrono_tz::Tz;
use log::info;
use thiserror::Error;

/// 就寝時間帯の開始（0時）
pub const SLEEP_START_HOUR: u32 = 0;
/// 就寝時間帯の終了（6時）
pub const SLEEP_END_HOUR: u32 = 6;
/// 時刻が分からないときの就寝時間
pub const UNSYNCED_SLEEP_SECS: u64 = 6 * 60 * 60;
/// 就寝判定の間隔
pub const SLEEP_CHECK_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SleepError {
    #[error("invalid sleep duration: {0}")]
    InvalidDuration(String),
}

/// ディープスリープのプラットフォーム抽象
pub trait DeepSleepPlatform {
    /// 指定マイクロ秒のディープスリープに入る
    fn deep_sleep(&self, duration_us: u64);
}

/// 秒単位でディープスリープ
pub fn sleep_for<P: DeepSleepPlatform>(platform: &P, duration_secs: u64) -> Result<(), SleepError> {
    if duration_secs == 0 {
        return Err(SleepError::InvalidDuration(
            "Sleep duration must be greater than 0".to_string(),
        ));
    }
    let duration_us = duration_secs
        .checked_mul(1_000_000)
        .ok_or_else(|| SleepError::InvalidDuration("Duration overflow".to_string()))?;

    info!("Sleeping for {} seconds ({} microseconds)", duration_secs, duration_us);
    platform.deep_sleep(duration_us);
    Ok(())
}

fn local_time(unix: u64, tz: &Tz) -> Option<DateTime<Tz>> {
    let secs = i64::try_from(unix).ok()?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.with_timezone(tz))
}

/// 就寝時間帯（0:00-6:00）か
///
/// 時刻未同期なら常に起きている扱いです。
pub fn is_sleep_time(unix: Option<u64>, tz: &Tz) -> bool {
    let Some(local) = unix.and_then(|u| local_time(u, tz)) else {
        return false;
    };
    (SLEEP_START_HOUR..SLEEP_END_HOUR).contains(&local.hour())
}

/// 6時までの秒数（未同期なら6時間）
pub fn sleep_duration_secs(unix: Option<u64>, tz: &Tz) -> u64 {
    let Some(local) = unix.and_then(|u| local_time(u, tz)) else {
        return UNSYNCED_SLEEP_SECS;
    };

    let mut hours_until_wakeup = SLEEP_END_HOUR as i64 - local.hour() as i64;
    if hours_until_wakeup <= 0 {
        hours_until_wakeup += 24;
    }
    let total = hours_until_wakeup * 3600 - local.minute() as i64 * 60 - local.second() as i64;
    total.max(1) as u64
}

#[cfg(not(feature = "esp"))]
pub use mock::MockDeepSleep;

#[cfg(not(feature = "esp"))]
mod mock {
    use super::DeepSleepPlatform;
    use std::sync::{Arc, Mutex};

    /// テスト用: スリープ要求を記録するだけ
    #[derive(Debug, Clone, Default)]
    pub struct MockDeepSleep {
        pub requests: Arc<Mutex<Vec<u64>>>,
    }

    impl MockDeepSleep {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn requests(&self) -> Vec<u64> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl DeepSleepPlatform for MockDeepSleep {
        fn deep_sleep(&self, duration_us: u64) {
            self.requests.lock().unwrap().push(duration_us);
        }
    }
}
