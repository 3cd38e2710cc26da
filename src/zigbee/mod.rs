/// Zigbee 無線スタックの抽象化
///
/// コーディネータの Dispatcher はこのトレイト越しにしか無線を触りません。
/// 実機では esp-zigbee-lib、テストでは MockRadio を使います。

#[cfg(feature = "esp")]
pub mod esp;

#[cfg(not(feature = "esp"))]
pub mod mock;

use thiserror::Error;

/// ZCL クラスタ ID
pub mod cluster {
    pub const ON_OFF: u16 = 0x0006;
    /// 時刻同期（カスタム）: coordinator → prop
    pub const TIME_SYNC: u16 = 0xFC00;
    /// トリガー要求（カスタム）: prop → coordinator
    pub const TRIGGER_REQUEST: u16 = 0xFC01;
}

/// ZCL 属性 ID
pub mod attribute {
    pub const ON_OFF: u16 = 0x0000;
    /// UNIX 時刻 (uint32)
    pub const TIME_SYNC_UNIX: u16 = 0x0000;
    /// トリガー要求 (uint8)
    pub const TRIGGER_REQUEST_VALUE: u16 = 0x0000;
}

/// On/Off クラスタのトグルコマンド
pub const ON_OFF_TOGGLE_COMMAND: u8 = 0x02;

/// トリガー要求属性の値: もう一方のプロップを鳴らす
pub const TRIGGER_OTHER_PROP: u8 = 1;

/// コーディネータ自身のエンドポイント
pub const COORDINATOR_ENDPOINT: u8 = 1;

/// 固定の拡張 PAN ID（再書き込み後も同じネットワークを再構成する）
pub const EXTENDED_PAN_ID: [u8; 8] = [0x5A, 0x49, 0x47, 0x42, 0x45, 0x57, 0x45, 0x4E];

/// 固定のネットワークキー
pub const NETWORK_KEY: [u8; 16] = [
    0x48, 0x61, 0x75, 0x6E, 0x74, 0x65, 0x64, 0x50, 0x75, 0x6D, 0x70, 0x6B, 0x69, 0x6E, 0x32, 0x35,
];

/// BDB コミッショニングモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningMode {
    Initialization,
    NetworkSteering,
    NetworkFormation,
}

impl CommissioningMode {
    /// BDB のモードマスク値
    pub fn mask(self) -> u8 {
        match self {
            CommissioningMode::Initialization => 0x00,
            CommissioningMode::NetworkSteering => 0x02,
            CommissioningMode::NetworkFormation => 0x04,
        }
    }

    pub fn from_mask(mask: u8) -> Option<Self> {
        match mask {
            0x00 => Some(CommissioningMode::Initialization),
            0x02 => Some(CommissioningMode::NetworkSteering),
            0x04 => Some(CommissioningMode::NetworkFormation),
            _ => None,
        }
    }
}

/// Zigbee スタックからのシグナル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZigbeeSignal {
    /// スタック初期化完了
    SkipStartup,
    DeviceFirstStart { ok: bool },
    DeviceReboot { ok: bool },
    /// ネットワーク形成の結果
    Formation { ok: bool },
    /// ネットワークステアリング（参加受付）の結果
    Steering { ok: bool },
    /// デバイス参加アナウンス
    DeviceAnnounce { ieee: u64, short: u16 },
    /// デバイス離脱
    DeviceLeave { ieee: u64, short: u16 },
    Other { code: u32, ok: bool },
}

/// 近隣テーブルのエントリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub ieee: u64,
    pub short: u16,
}

/// 属性値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    U8(u8),
    U16(u16),
    U32(u32),
}

/// プロップからの属性書き込み
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeWrite {
    /// 送信元ショートアドレス（スタックが通知しない場合は None）
    pub source_short: Option<u16>,
    pub cluster: u16,
    pub attribute: u16,
    pub value: AttributeValue,
}

/// 無線スタックからのイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    Signal(ZigbeeSignal),
    AttributeWrite(AttributeWrite),
}

/// 無線操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("zigbee stack lock not acquired")]
    LockTimeout,
    #[error("zigbee command failed: {0}")]
    CommandFailed(String),
    #[error("zigbee stack not ready")]
    NotReady,
}

pub type RadioResult<T> = Result<T, RadioError>;

/// Zigbee 無線スタックのトレイト
///
/// コマンドは非同期（スタックのタスクに積むだけ）で、呼び出し元は結果を待ちません。
pub trait ZigbeeRadio: Send + Sync {
    /// コミッショニングを開始
    fn start_commissioning(&self, mode: CommissioningMode) -> RadioResult<()>;

    /// `delay_ms` 後にコミッショニングを開始
    fn schedule_commissioning(&self, mode: CommissioningMode, delay_ms: u32) -> RadioResult<()>;

    /// On/Off トグルをユニキャスト
    fn send_toggle(&self, short: u16, endpoint: u8) -> RadioResult<()>;

    /// 時刻同期属性 (0xFC00/0x0000) を書き込む
    fn write_time(&self, short: u16, endpoint: u8, unix: u32) -> RadioResult<()>;

    /// 近隣テーブルを取得
    fn neighbors(&self) -> RadioResult<Vec<Neighbor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commissioning_mask_round_trip() {
        for mode in [
            CommissioningMode::Initialization,
            CommissioningMode::NetworkSteering,
            CommissioningMode::NetworkFormation,
        ] {
            assert_eq!(CommissioningMode::from_mask(mode.mask()), Some(mode));
        }
        assert_eq!(CommissioningMode::from_mask(0x08), None);
    }
}
