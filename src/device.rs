/// プロップの識別子と許可リスト
///
/// コーディネータが扱うプロップは固定で、IEEE アドレス（64bit）で識別します。
/// 許可リストにない無線機はネットワーク上に見えても登録しません。

use log::debug;
use thiserror::Error;

/// RIP 墓石 (XIAO ESP32C6) の IEEE アドレス
pub const RIP_TOMBSTONE_IEEE: u64 = 0x9888_e0ff_fe7a_d6f4;

/// かかし (XIAO ESP32C6) の IEEE アドレス
pub const SCARECROW_IEEE: u64 = 0x9888_e0ff_fe7a_de0c;

/// プロップの識別子
///
/// 値はリンクプロトコルの device id (0x30/0x31 のペイロード) と一致します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    /// RIP 墓石 (LED)
    RipTombstone = 1,
    /// お化けかぼちゃのかかし (リレー)
    Scarecrow = 2,
}

/// プロップごとの固定情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// 表示名
    pub name: &'static str,
    /// `/api/status` の JSON キー
    pub api_key: &'static str,
    /// 許可リストの既定 IEEE アドレス
    pub default_identity: u64,
}

/// プロップの一覧（ステータスフラグのビット順）
pub const DEVICES: [DeviceInfo; 2] = [
    DeviceInfo {
        id: DeviceId::RipTombstone,
        name: "RIP Tombstone",
        api_key: "rip_tombstone",
        default_identity: RIP_TOMBSTONE_IEEE,
    },
    DeviceInfo {
        id: DeviceId::Scarecrow,
        name: "Haunted Pumpkin Scarecrow",
        api_key: "halloween_trigger",
        default_identity: SCARECROW_IEEE,
    },
];

impl DeviceId {
    /// 管理対象の全デバイス（ステータスフラグのビット順）
    pub const ALL: [DeviceId; 2] = [DEVICES[0].id, DEVICES[1].id];

    /// デバイス数
    pub const COUNT: usize = Self::ALL.len();

    /// u8からDeviceIdに変換
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.to_u8() == value)
    }

    /// DeviceIdをu8に変換
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// ステータスフラグ内での位置 (0始まり)
    pub fn index(self) -> usize {
        self.to_u8() as usize - 1
    }

    pub fn info(self) -> &'static DeviceInfo {
        &DEVICES[self.index()]
    }

    /// 表示名
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// `/api/status` の JSON キー
    pub fn api_key(self) -> &'static str {
        self.info().api_key
    }

    /// もう一方のプロップ（かかしからのトリガー要求先）
    ///
    /// トリガー要求はプロップ2台の構成でのみ意味を持ちます。
    pub fn other(self) -> DeviceId {
        match self {
            DeviceId::RipTombstone => DeviceId::Scarecrow,
            DeviceId::Scarecrow => DeviceId::RipTombstone,
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 許可リストの1エントリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    pub id: DeviceId,
    pub hardware_identity: u64,
}

/// 許可リスト（自動検出はしない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<KnownDevice>,
}

impl Default for AllowList {
    fn default() -> Self {
        Self::from_entries(DEVICES.iter().map(|info| KnownDevice {
            id: info.id,
            hardware_identity: info.default_identity,
        }))
    }
}

impl AllowList {
    pub fn new(rip_tombstone: u64, scarecrow: u64) -> Self {
        Self::from_entries([
            KnownDevice {
                id: DeviceId::RipTombstone,
                hardware_identity: rip_tombstone,
            },
            KnownDevice {
                id: DeviceId::Scarecrow,
                hardware_identity: scarecrow,
            },
        ])
    }

    /// エントリ列から作る（同じデバイスが重複した場合は後のものを使う）
    pub fn from_entries(entries: impl IntoIterator<Item = KnownDevice>) -> Self {
        let mut list: Vec<KnownDevice> = Vec::new();
        for entry in entries {
            list.retain(|known| known.id != entry.id);
            list.push(entry);
        }
        list.sort_by_key(|entry| entry.id);
        Self { entries: list }
    }

    /// IEEE アドレスからデバイスを引く
    pub fn lookup(&self, hardware_identity: u64) -> Option<DeviceId> {
        let found = self
            .entries
            .iter()
            .find(|entry| entry.hardware_identity == hardware_identity)
            .map(|entry| entry.id);
        if found.is_none() {
            debug!("{} is not on the allow-list", format_ieee(hardware_identity));
        }
        found
    }

    /// デバイスの IEEE アドレス
    pub fn identity_of(&self, id: DeviceId) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.hardware_identity)
    }

    pub fn entries(&self) -> &[KnownDevice] {
        &self.entries
    }
}

/// IEEE アドレス解析エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IeeeParseError {
    #[error("IEEE address is empty")]
    Empty,
    #[error("invalid IEEE address: '{0}'")]
    Invalid(String),
}

/// IEEE アドレスを "98:88:e0:ff:fe:7a:de:0c" 形式に整形
pub fn format_ieee(identity: u64) -> String {
    identity
        .to_be_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// IEEE アドレス文字列を解析します
///
/// "0x9888e0fffe7ade0c" と "98:88:e0:ff:fe:7a:de:0c" の両方を受け付けます。
pub fn parse_ieee(text: &str) -> Result<u64, IeeeParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IeeeParseError::Empty);
    }

    let hex: String = if trimmed.contains(':') {
        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() != 8 || parts.iter().any(|p| p.len() != 2) {
            return Err(IeeeParseError::Invalid(trimmed.to_string()));
        }
        parts.concat()
    } else {
        trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
            .to_string()
    };

    if hex.is_empty() || hex.len() > 16 {
        return Err(IeeeParseError::Invalid(trimmed.to_string()));
    }
    u64::from_str_radix(&hex, 16).map_err(|_| IeeeParseError::Invalid(trimmed.to_string()))
}
