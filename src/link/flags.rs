use crate::device::DeviceId;
use serde::Serialize;

// 各種フラグの先頭ビット。デバイスごとに DeviceId::index() だけずらす
const TIME_SYNCED_SHIFT: usize = 0;
const CONNECTED_SHIFT: usize = DeviceId::COUNT;
const COOLDOWN_SHIFT: usize = DeviceId::COUNT * 2;

/// 1デバイス分のステータス
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub time_synced: bool,
    pub in_cooldown: bool,
}

/// ステータス応答 (0x11) のフラグ
///
/// bit0=A 時刻同期, bit1=B 時刻同期, bit2=A 接続, bit3=B 接続,
/// bit4=A クールダウン中, bit5=B クールダウン中
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(u16);

impl StatusFlags {
    pub fn from_bits(bits: u16) -> Self {
        StatusFlags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        StatusFlags(u16::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// デバイスのステータスを設定
    pub fn set(&mut self, id: DeviceId, status: DeviceStatus) {
        self.set_bit(TIME_SYNCED_SHIFT + id.index(), status.time_synced);
        self.set_bit(CONNECTED_SHIFT + id.index(), status.connected);
        self.set_bit(COOLDOWN_SHIFT + id.index(), status.in_cooldown);
    }

    /// デバイスのステータスを取り出す
    pub fn device(self, id: DeviceId) -> DeviceStatus {
        DeviceStatus {
            connected: self.bit(CONNECTED_SHIFT + id.index()),
            time_synced: self.bit(TIME_SYNCED_SHIFT + id.index()),
            in_cooldown: self.bit(COOLDOWN_SHIFT + id.index()),
        }
    }

    fn bit(self, position: usize) -> bool {
        self.0 & (1 << position) != 0
    }

    fn set_bit(&mut self, position: usize, value: bool) {
        if value {
            self.0 |= 1 << position;
        } else {
            self.0 &= !(1 << position);
        }
    }
}
