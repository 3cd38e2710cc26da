/// 受信バイト列からのフレーム抽出
///
/// 開始バイト 0xAA の各候補位置で、オペコードから決まる位置に終了バイト 0x55 が
/// あることを確認してから採用します。ペイロード中の 0xAA を誤ってフレームと
/// 見なさないよう、終了バイトが合わない候補は1バイト進めて読み飛ばします。

use super::frame::{LinkFrame, Opcode, MAX_FRAME_LEN, START_BYTE};
use super::{LinkPort, LinkResult, PortError, READ_BUFFER_SIZE};
use log::{debug, warn};

/// 1回分の走査結果
#[derive(Debug, Default)]
struct ScanOutcome {
    frames: Vec<LinkFrame>,
    /// 末尾で途切れている候補の開始位置
    pending_from: Option<usize>,
}

fn scan(buffer: &[u8]) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let mut i = 0;

    while i < buffer.len() {
        if buffer[i] != START_BYTE {
            i += 1;
            continue;
        }

        let Some(&raw_opcode) = buffer.get(i + 1) else {
            outcome.pending_from.get_or_insert(i);
            break;
        };

        let Some(opcode) = Opcode::from_u8(raw_opcode) else {
            warn!("Skipping start byte at {} with unknown opcode 0x{:02X}", i, raw_opcode);
            i += 1;
            continue;
        };

        let frame_len = opcode.frame_len();
        if i + frame_len > buffer.len() {
            // 後続の候補が完結している可能性もあるので走査は続ける
            outcome.pending_from.get_or_insert(i);
            i += 1;
            continue;
        }

        match LinkFrame::decode(&buffer[i..i + frame_len]) {
            Ok(frame) => {
                outcome.frames.push(frame);
                outcome.pending_from = None;
                i += frame_len;
            }
            Err(e) => {
                warn!("Rejected frame candidate at {}: {}", i, e);
                i += 1;
            }
        }
    }

    outcome
}

/// 1回分の読み取りバッファからフレームを抽出します（読み取り間で状態を持たない）
///
/// 2回の読み取りにまたがったフレームは取りこぼします。
pub fn scan_frames(buffer: &[u8]) -> Vec<LinkFrame> {
    scan(buffer).frames
}

/// 読み取り間で途切れたフレームの断片を保持する受信器
#[derive(Debug)]
pub struct FrameReceiver {
    carry: heapless::Vec<u8, MAX_FRAME_LEN>,
    carry_partial_frames: bool,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FrameReceiver {
    /// `carry_partial_frames` が false の場合は `scan_frames` と同じ動作になります
    pub fn new(carry_partial_frames: bool) -> Self {
        Self {
            carry: heapless::Vec::new(),
            carry_partial_frames,
        }
    }

    /// 保持中の断片のバイト数
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }

    /// 受信したチャンクを処理し、完成したフレームを返す
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LinkFrame> {
        let mut buffer = Vec::with_capacity(self.carry.len() + chunk.len());
        buffer.extend_from_slice(&self.carry);
        buffer.extend_from_slice(chunk);
        self.carry.clear();

        let outcome = scan(&buffer);

        if self.carry_partial_frames {
            if let Some(start) = outcome.pending_from {
                let tail = &buffer[start..];
                if self.carry.extend_from_slice(tail).is_err() {
                    warn!("Dropping {} byte partial frame (exceeds max frame length)", tail.len());
                } else {
                    debug!("Carrying {} byte partial frame to next read", tail.len());
                }
            }
        } else if let Some(start) = outcome.pending_from {
            debug!("Dropping {} byte partial frame", buffer.len() - start);
        }

        outcome.frames
    }

    /// ポートから1回読み取り、完成したフレームを返す
    ///
    /// タイムアウトはエラーではなく空の結果として扱います。
    pub fn poll<P: LinkPort>(&mut self, port: &mut P, timeout_ms: u32) -> LinkResult<Vec<LinkFrame>> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        match port.read(&mut buffer, timeout_ms) {
            Ok(0) => Ok(Vec::new()),
            Ok(bytes_read) => {
                debug!("Link RX {} bytes: {:02X?}", bytes_read, &buffer[..bytes_read]);
                Ok(self.push(&buffer[..bytes_read]))
            }
            Err(PortError::Timeout) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
