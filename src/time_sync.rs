/// 時刻配信
///
/// 外部時刻源 (NTP) → ゲートウェイ → コーディネータ (0x20) → 各プロップ (0xFC00)
/// の一方向の流れのうち、ノードに依存しない部分をまとめています。

use crate::gateway::GatewayError;
use crate::link::LinkFrame;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::fmt::Display;
use std::time::Duration;

/// これより前の年の時計は未同期とみなす
pub const MIN_PLAUSIBLE_YEAR: i32 = 2025;

/// 未同期時の表示
pub const NOT_SYNCED: &str = "Not synced";

/// 同期待ちの進捗をログに出す間隔（秒）
const PROGRESS_LOG_INTERVAL_SECS: u64 = 5;

fn to_utc(unix: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(unix).ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// RTC の値が実時刻として妥当か
pub fn is_plausible(unix: u64) -> bool {
    to_utc(unix)
        .map(|t| t.year() >= MIN_PLAUSIBLE_YEAR)
        .unwrap_or(false)
}

/// 現地時刻を `2025-10-31 21:15:00 PDT` の形式で
pub fn format_local(unix: u64, tz: &Tz) -> String {
    match to_utc(unix) {
        Some(t) => t.with_timezone(tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        None => NOT_SYNCED.to_string(),
    }
}

/// 画面・API 用の時刻表示（未同期なら "Not synced"）
pub fn format_clock(unix: u64, synced: bool, tz: &Tz) -> String {
    if synced {
        format_local(unix, tz)
    } else {
        NOT_SYNCED.to_string()
    }
}

/// イベントログ用の `HH:MM:SS`
pub fn format_event_time(unix: u64, tz: &Tz) -> String {
    match to_utc(unix) {
        Some(t) => t.with_timezone(tz).format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// 時刻同期フレームを作る
///
/// 時計が妥当でない、または 32bit に収まらない場合は None。
pub fn time_sync_frame(now_unix: u64) -> Option<LinkFrame> {
    if !is_plausible(now_unix) {
        warn!("Wall clock not plausible ({}), time sync not sent", now_unix);
        return None;
    }
    match u32::try_from(now_unix) {
        Ok(unix) => Some(LinkFrame::TimeSync(unix)),
        Err(_) => {
            error!("Wall clock {} does not fit the 32-bit time sync payload", now_unix);
            None
        }
    }
}

/// 時刻同期を待つ
///
/// `is_synced` を1秒ごとに確認し、`timeout_secs` を過ぎたら
/// `GatewayError::TimeUnavailable` を返します。時刻なしで動かすことはしません。
pub fn wait_for_time<F, S>(
    mut is_synced: F,
    timeout_secs: u64,
    mut sleep: S,
) -> Result<u64, GatewayError>
where
    F: FnMut() -> bool,
    S: FnMut(Duration),
{
    info!("Waiting for NTP time synchronization (timeout {} s)", timeout_secs);

    let mut elapsed = 0;
    while !is_synced() {
        if elapsed >= timeout_secs {
            error!("NTP time sync failed after {} seconds", elapsed);
            return Err(GatewayError::TimeUnavailable {
                waited_secs: elapsed,
            });
        }
        sleep(Duration::from_secs(1));
        elapsed += 1;
        if elapsed % PROGRESS_LOG_INTERVAL_SECS == 0 {
            info!("Still waiting for NTP sync... ({}/{} seconds)", elapsed, timeout_secs);
        }
    }

    info!("Time synchronized after {} s", elapsed);
    Ok(elapsed)
}

/// 成功するまで一定間隔で再試行
///
/// WiFi 接続のように諦める選択肢がない処理に使います。
pub fn retry_forever<T, E, F, S>(what: &str, backoff: Duration, mut op: F, mut sleep: S) -> T
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    S: FnMut(Duration),
{
    let mut attempt: u32 = 1;
    loop {
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempts", what, attempt);
                }
                return value;
            }
            Err(e) => {
                info!(
                    "{} failed (attempt {}): {}, retrying in {} ms",
                    what,
                    attempt,
                    e,
                    backoff.as_millis()
                );
                sleep(backoff);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
