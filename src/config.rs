use crate::device::{parse_ieee, AllowList, IeeeParseError};
use chrono_tz::Tz;
use log::LevelFilter;

/// アプリケーション設定
///
/// ビルド時に`build.rs`によって`cfg.toml`ファイルから読み込まれます。
/// `cfg.toml` が無い場合は `#[default]` の値になります。
#[toml_cfg::toml_config]
pub struct Config {
    #[default("")]
    wifi_ssid: &'static str,

    #[default("")]
    wifi_password: &'static str,

    #[default("pool.ntp.org")]
    ntp_server: &'static str,

    #[default("America/Los_Angeles")] // PST8PDT,M3.2.0,M11.1.0 相当
    timezone: &'static str,

    #[default("info")]
    log_level: &'static str,

    #[default("0x9888e0fffe7ad6f4")]
    rip_tombstone_ieee: &'static str,

    #[default("0x9888e0fffe7ade0c")]
    scarecrow_ieee: &'static str,

    #[default(15)]
    zigbee_channel: u8,
}

/// 設定エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid IEEE address for {field}: {source}")]
    InvalidIeee {
        field: &'static str,
        source: IeeeParseError,
    },
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),
    #[error("unknown log level: {0}")]
    InvalidLogLevel(String),
    #[error("zigbee channel must be 11-26: {0}")]
    InvalidChannel(u8),
    #[error("WiFi SSID is not configured")]
    MissingWifiSsid,
}

/// cfg.toml から読んだままの値
#[derive(Debug, Clone, Copy)]
pub struct RawConfig<'a> {
    pub wifi_ssid: &'a str,
    pub wifi_password: &'a str,
    pub ntp_server: &'a str,
    pub timezone: &'a str,
    pub log_level: &'a str,
    pub rip_tombstone_ieee: &'a str,
    pub scarecrow_ieee: &'a str,
    pub zigbee_channel: u8,
}

impl RawConfig<'static> {
    /// ビルド時設定
    pub fn from_build() -> Self {
        Self {
            wifi_ssid: CONFIG.wifi_ssid,
            wifi_password: CONFIG.wifi_password,
            ntp_server: CONFIG.ntp_server,
            timezone: CONFIG.timezone,
            log_level: CONFIG.log_level,
            rip_tombstone_ieee: CONFIG.rip_tombstone_ieee,
            scarecrow_ieee: CONFIG.scarecrow_ieee,
            zigbee_channel: CONFIG.zigbee_channel,
        }
    }
}

/// 検証済みのアプリケーション設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WiFi SSID（ゲートウェイのみ使用）
    pub wifi_ssid: String,
    /// WiFi パスワード
    pub wifi_password: String,
    /// NTP サーバー
    pub ntp_server: String,
    /// 表示用タイムゾーン
    pub timezone: Tz,
    /// ログレベル
    pub log_level: LevelFilter,
    /// 登録を許可するプロップ
    pub allow_list: AllowList,
    /// Zigbee チャンネル
    pub zigbee_channel: u8,
}

impl AppConfig {
    /// ビルド時設定を読み込んで検証します
    pub fn from_cfg() -> Result<Self, ConfigError> {
        Self::parse(&RawConfig::from_build())
    }

    pub fn parse(raw: &RawConfig<'_>) -> Result<Self, ConfigError> {
        let rip = parse_ieee(raw.rip_tombstone_ieee).map_err(|source| ConfigError::InvalidIeee {
            field: "rip_tombstone_ieee",
            source,
        })?;
        let scarecrow = parse_ieee(raw.scarecrow_ieee).map_err(|source| ConfigError::InvalidIeee {
            field: "scarecrow_ieee",
            source,
        })?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(raw.timezone.to_string()))?;

        let log_level: LevelFilter = raw
            .log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(raw.log_level.to_string()))?;

        if !(11..=26).contains(&raw.zigbee_channel) {
            return Err(ConfigError::InvalidChannel(raw.zigbee_channel));
        }

        Ok(Self {
            wifi_ssid: raw.wifi_ssid.to_string(),
            wifi_password: raw.wifi_password.to_string(),
            ntp_server: raw.ntp_server.to_string(),
            timezone,
            log_level,
            allow_list: AllowList::new(rip, scarecrow),
            zigbee_channel: raw.zigbee_channel,
        })
    }

    /// ゲートウェイ起動に必要な項目を確認
    pub fn require_wifi(&self) -> Result<(), ConfigError> {
        if self.wifi_ssid.trim().is_empty() {
            return Err(ConfigError::MissingWifiSsid);
        }
        Ok(())
    }
}

/// シリアルリンクの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// ボーレート (8N1)
    pub baud_rate: u32,
    /// 1回の読み取りの待ち時間
    pub read_timeout_ms: u32,
    pub write_timeout_ms: u32,
    /// 読み取りをまたいだフレームの断片を保持するか
    pub carry_partial_frames: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 100,
            write_timeout_ms: 100,
            carry_partial_frames: true,
        }
    }
}

/// コーディネータの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// ネットワーク形成失敗時の再試行間隔
    pub formation_retry_ms: u32,
    /// ステアリング失敗時の再試行間隔
    pub steering_retry_ms: u32,
    /// 近隣テーブル照合の間隔
    pub neighbor_scan_interval_ms: u64,
    /// 「両方トリガー」で2台目に送るまでの間隔
    pub trigger_gap_ms: u64,
    /// Zigbee チャンネル
    pub channel: u8,
    /// ゲートウェイ宛て送信キューの上限
    pub outbox_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            formation_retry_ms: 1000,
            steering_retry_ms: 1000,
            neighbor_scan_interval_ms: 10_000,
            trigger_gap_ms: 100,
            channel: 15,
            outbox_capacity: 16,
        }
    }
}

/// ゲートウェイの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewayConfig {
    /// ステータス要求の間隔
    pub status_poll_interval_ms: u64,
    /// 起動後、最初のステータス要求までの待ち
    pub first_status_delay_ms: u64,
    /// 時刻再配信の間隔
    pub time_resync_interval_ms: u64,
    /// 起動時の NTP 同期待ちの上限
    pub ntp_timeout_secs: u64,
    /// WiFi 再接続の待ち時間
    pub wifi_retry_backoff_ms: u64,
    /// PIR センサーの読み取り間隔
    pub sensor_poll_ms: u64,
    /// PIR のレベルが確定するまでに続く必要がある時間
    pub motion_debounce_ms: u64,
    /// 未同期のプロップが見えたときの時刻再配信の最短間隔
    pub unsynced_push_interval_secs: u64,
    /// 待機表示（SSID / IP）の再描画間隔
    pub display_refresh_interval_ms: u64,
    /// `/api/status` に載せるイベント数
    pub api_event_limit: usize,
    pub timezone: Tz,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: 3_000,
            first_status_delay_ms: 2_000,
            time_resync_interval_ms: 3_600_000,
            ntp_timeout_secs: 60,
            wifi_retry_backoff_ms: 1_000,
            sensor_poll_ms: 100,
            motion_debounce_ms: 200,
            unsynced_push_interval_secs: 30,
            display_refresh_interval_ms: 10_000,
            api_event_limit: 20,
            timezone: chrono_tz::America::Los_Angeles,
        }
    }
}
