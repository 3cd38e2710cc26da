/// リンクフレームの定義とエンコード/デコード

use super::flags::StatusFlags;
use crate::device::DeviceId;
use log::warn;
use thiserror::Error;

/// 開始バイト
pub const START_BYTE: u8 = 0xAA;
/// 終了バイト
pub const END_BYTE: u8 = 0x55;
/// 最大フレーム長 (START + OPCODE + 4 + END)
pub const MAX_FRAME_LEN: usize = 7;
/// 最小フレーム長 (START + OPCODE + END)
pub const MIN_FRAME_LEN: usize = 3;

/// オペコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// 墓石をトリガー
    TriggerRip = 0x01,
    /// かかしをトリガー
    TriggerScarecrow = 0x02,
    /// 両方をトリガー
    TriggerBoth = 0x03,
    /// ステータス要求
    StatusRequest = 0x10,
    /// ステータス応答 (2バイトのフラグ)
    StatusResponse = 0x11,
    /// 時刻同期 (4バイトの UNIX 時刻)
    TimeSync = 0x20,
    /// デバイス参加 (1バイトの device id)
    DeviceJoined = 0x30,
    /// デバイス離脱 (1バイトの device id)
    DeviceLeft = 0x31,
}

impl Opcode {
    /// u8からOpcodeに変換
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Opcode::TriggerRip),
            0x02 => Some(Opcode::TriggerScarecrow),
            0x03 => Some(Opcode::TriggerBoth),
            0x10 => Some(Opcode::StatusRequest),
            0x11 => Some(Opcode::StatusResponse),
            0x20 => Some(Opcode::TimeSync),
            0x30 => Some(Opcode::DeviceJoined),
            0x31 => Some(Opcode::DeviceLeft),
            _ => None,
        }
    }

    /// Opcodeをu8に変換
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// 固定ペイロード長
    pub fn payload_len(self) -> usize {
        match self {
            Opcode::TriggerRip
            | Opcode::TriggerScarecrow
            | Opcode::TriggerBoth
            | Opcode::StatusRequest => 0,
            Opcode::StatusResponse => 2,
            Opcode::TimeSync => 4,
            Opcode::DeviceJoined | Opcode::DeviceLeft => 1,
        }
    }

    /// 開始・終了バイトを含むフレーム長
    pub fn frame_len(self) -> usize {
        MIN_FRAME_LEN + self.payload_len()
    }
}

/// トリガー対象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTarget {
    Rip,
    Scarecrow,
    Both,
}

impl TriggerTarget {
    /// 対象デバイス（送信順）
    pub fn devices(self) -> &'static [DeviceId] {
        match self {
            TriggerTarget::Rip => &[DeviceId::RipTombstone],
            TriggerTarget::Scarecrow => &[DeviceId::Scarecrow],
            TriggerTarget::Both => &[DeviceId::RipTombstone, DeviceId::Scarecrow],
        }
    }

    /// 単一デバイスのトリガー
    pub fn single(id: DeviceId) -> Self {
        match id {
            DeviceId::RipTombstone => TriggerTarget::Rip,
            DeviceId::Scarecrow => TriggerTarget::Scarecrow,
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            TriggerTarget::Rip => Opcode::TriggerRip,
            TriggerTarget::Scarecrow => Opcode::TriggerScarecrow,
            TriggerTarget::Both => Opcode::TriggerBoth,
        }
    }

    /// `POST /trigger/{name}` のパス名から変換
    pub fn from_route_name(name: &str) -> Option<Self> {
        match name {
            "rip" => Some(TriggerTarget::Rip),
            "halloween" => Some(TriggerTarget::Scarecrow),
            "both" => Some(TriggerTarget::Both),
            _ => None,
        }
    }
}

/// リンクフレーム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFrame {
    Trigger(TriggerTarget),
    StatusRequest,
    StatusResponse(StatusFlags),
    TimeSync(u32),
    DeviceJoined(DeviceId),
    DeviceLeft(DeviceId),
}

/// フレーム解析エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame does not start with 0xAA (got 0x{0:02X})")]
    MissingStartByte(u8),
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("frame for opcode 0x{opcode:02X} needs {expected} bytes, got {actual}")]
    Truncated {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
    #[error("frame for opcode 0x{opcode:02X} ends with 0x{found:02X} instead of 0x55")]
    BadEndByte { opcode: u8, found: u8 },
    #[error("unknown device id {0}")]
    UnknownDevice(u8),
}

impl LinkFrame {
    pub fn opcode(&self) -> Opcode {
        match self {
            LinkFrame::Trigger(target) => target.opcode(),
            LinkFrame::StatusRequest => Opcode::StatusRequest,
            LinkFrame::StatusResponse(_) => Opcode::StatusResponse,
            LinkFrame::TimeSync(_) => Opcode::TimeSync,
            LinkFrame::DeviceJoined(_) => Opcode::DeviceJoined,
            LinkFrame::DeviceLeft(_) => Opcode::DeviceLeft,
        }
    }

    /// バイナリ形式にエンコード
    ///
    /// フォーマット:
    /// ```text
    /// [0xAA] [OPCODE(1)] [PAYLOAD(0..4, BE)] [0x55]
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let opcode = self.opcode();
        let mut data = Vec::with_capacity(opcode.frame_len());
        data.push(START_BYTE);
        data.push(opcode.to_u8());
        match self {
            LinkFrame::Trigger(_) | LinkFrame::StatusRequest => {}
            LinkFrame::StatusResponse(flags) => data.extend_from_slice(&flags.to_be_bytes()),
            LinkFrame::TimeSync(unix) => data.extend_from_slice(&unix.to_be_bytes()),
            LinkFrame::DeviceJoined(id) | LinkFrame::DeviceLeft(id) => data.push(id.to_u8()),
        }
        data.push(END_BYTE);
        data
    }

    /// 1フレーム分のバイト列をデコード
    ///
    /// `data` の先頭がフレームの開始である必要があります。余分な後続バイトは無視します。
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let start = *data.first().ok_or(FrameError::Truncated {
            opcode: 0,
            expected: MIN_FRAME_LEN,
            actual: 0,
        })?;
        if start != START_BYTE {
            return Err(FrameError::MissingStartByte(start));
        }

        let raw_opcode = *data.get(1).ok_or(FrameError::Truncated {
            opcode: 0,
            expected: MIN_FRAME_LEN,
            actual: data.len(),
        })?;
        let opcode = Opcode::from_u8(raw_opcode).ok_or(FrameError::UnknownOpcode(raw_opcode))?;

        let frame_len = opcode.frame_len();
        if data.len() < frame_len {
            return Err(FrameError::Truncated {
                opcode: raw_opcode,
                expected: frame_len,
                actual: data.len(),
            });
        }

        let end = data[frame_len - 1];
        if end != END_BYTE {
            return Err(FrameError::BadEndByte {
                opcode: raw_opcode,
                found: end,
            });
        }

        let payload = &data[2..frame_len - 1];
        let frame = match opcode {
            Opcode::TriggerRip => LinkFrame::Trigger(TriggerTarget::Rip),
            Opcode::TriggerScarecrow => LinkFrame::Trigger(TriggerTarget::Scarecrow),
            Opcode::TriggerBoth => LinkFrame::Trigger(TriggerTarget::Both),
            Opcode::StatusRequest => LinkFrame::StatusRequest,
            Opcode::StatusResponse => {
                LinkFrame::StatusResponse(StatusFlags::from_be_bytes([payload[0], payload[1]]))
            }
            Opcode::TimeSync => LinkFrame::TimeSync(u32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
            Opcode::DeviceJoined | Opcode::DeviceLeft => {
                let id = DeviceId::from_u8(payload[0]).ok_or_else(|| {
                    warn!("Device notification with unknown device id {}", payload[0]);
                    FrameError::UnknownDevice(payload[0])
                })?;
                if opcode == Opcode::DeviceJoined {
                    LinkFrame::DeviceJoined(id)
                } else {
                    LinkFrame::DeviceLeft(id)
                }
            }
        };
        Ok(frame)
    }
}
