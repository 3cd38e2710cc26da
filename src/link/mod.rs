/// ゲートウェイ ⇔ コーディネータ間のシリアルリンク
///
/// フレーム形式: `0xAA | OPCODE | PAYLOAD (0..4) | 0x55`
/// 115200bps 8N1、複数バイトのペイロードはビッグエンディアン。

pub mod flags;
pub mod frame;
pub mod scanner;

#[cfg(feature = "esp")]
pub mod uart;

// Mock実装（テストとnon-espビルドで使用可能）
#[cfg(not(feature = "esp"))]
pub mod mock;

pub use flags::{DeviceStatus, StatusFlags};
pub use frame::{LinkFrame, Opcode, TriggerTarget, END_BYTE, MAX_FRAME_LEN, START_BYTE};
pub use scanner::{scan_frames, FrameReceiver};

use log::debug;
use thiserror::Error;

/// シリアルリンクでの結果の型
pub type LinkResult<T> = Result<T, PortError>;

/// 1回の読み取りで使うバッファサイズ
pub const READ_BUFFER_SIZE: usize = 64;

/// シリアルポートのエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    /// 初期化エラー
    #[error("serial link initialization error: {0}")]
    InitError(String),
    /// 書き込みエラー
    #[error("serial link write error: {0}")]
    WriteError(String),
    /// 一部しか書き込めなかった
    #[error("short write on serial link: {written}/{expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    /// タイムアウト
    #[error("serial link operation timed out")]
    Timeout,
    /// その他
    #[error("serial link error: {0}")]
    Other(String),
}

#[cfg(feature = "esp")]
impl From<esp_idf_svc::sys::EspError> for PortError {
    fn from(error: esp_idf_svc::sys::EspError) -> Self {
        if error.code() == esp_idf_svc::sys::ESP_ERR_TIMEOUT {
            PortError::Timeout
        } else {
            PortError::Other(format!("ESP-IDF error: {}", error))
        }
    }
}

/// シリアルリンクのトレイト
///
/// 実機 (UART) とテスト用 (Mock) を切り替えるための境界です。
pub trait LinkPort {
    /// データを書き込む
    fn write(&mut self, data: &[u8], timeout_ms: u32) -> LinkResult<usize>;

    /// データを読み取る（`timeout_ms` まで待つ）
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> LinkResult<usize>;

    /// フレームをエンコードして送信する
    fn send_frame(&mut self, frame: &LinkFrame, timeout_ms: u32) -> LinkResult<()> {
        let bytes = frame.encode();
        let written = self.write(&bytes, timeout_ms)?;
        if written != bytes.len() {
            return Err(PortError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        debug!("Link TX {:?}: {:02X?}", frame, bytes);
        Ok(())
    }
}
