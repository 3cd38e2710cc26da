use super::{scan_frames, LinkFrame, LinkPort, LinkResult, PortError};
use std::sync::{Arc, Mutex};

/// テスト用のシリアルリンクのモック実装
///
/// 送信されたバイト列を記録し、読み取りはキューに積んだチャンクを先頭から返します。
#[derive(Debug, Clone)]
pub struct MockLinkPort {
    /// 送信されたデータの記録
    pub sent_data: Arc<Mutex<Vec<Vec<u8>>>>,
    /// 読み取り用のデータキュー（先頭から取り出される）
    pub read_data_queue: Arc<Mutex<Vec<Vec<u8>>>>,
    /// エラーシミュレーション用のフラグ
    pub simulate_write_error: Arc<Mutex<bool>>,
    pub simulate_read_error: Arc<Mutex<bool>>,
}

impl Default for MockLinkPort {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLinkPort {
    pub fn new() -> Self {
        Self {
            sent_data: Arc::new(Mutex::new(Vec::new())),
            read_data_queue: Arc::new(Mutex::new(Vec::new())),
            simulate_write_error: Arc::new(Mutex::new(false)),
            simulate_read_error: Arc::new(Mutex::new(false)),
        }
    }

    /// テスト用: 読み取り用データをキューに追加
    pub fn queue_read_data(&self, data: Vec<u8>) {
        self.read_data_queue.lock().unwrap().push(data);
    }

    /// テスト用: フレームを読み取りキューに追加
    pub fn queue_frame(&self, frame: &LinkFrame) {
        self.queue_read_data(frame.encode());
    }

    /// テスト用: 送信されたデータを取得
    pub fn get_sent_data(&self) -> Vec<Vec<u8>> {
        self.sent_data.lock().unwrap().clone()
    }

    /// テスト用: 送信されたフレームを取得
    pub fn sent_frames(&self) -> Vec<LinkFrame> {
        let bytes: Vec<u8> = self.get_sent_data().concat();
        scan_frames(&bytes)
    }

    /// テスト用: 送信データをクリア
    pub fn clear_sent_data(&self) {
        self.sent_data.lock().unwrap().clear();
    }

    /// テスト用: 書き込みエラーをシミュレート
    pub fn set_write_error(&self, enable: bool) {
        *self.simulate_write_error.lock().unwrap() = enable;
    }

    /// テスト用: 読み取りエラーをシミュレート
    pub fn set_read_error(&self, enable: bool) {
        *self.simulate_read_error.lock().unwrap() = enable;
    }
}

impl LinkPort for MockLinkPort {
    fn write(&mut self, data: &[u8], _timeout_ms: u32) -> LinkResult<usize> {
        if *self.simulate_write_error.lock().unwrap() {
            return Err(PortError::WriteError("Simulated write error".to_string()));
        }

        self.sent_data.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8], _timeout_ms: u32) -> LinkResult<usize> {
        if *self.simulate_read_error.lock().unwrap() {
            return Err(PortError::Other("Simulated read error".to_string()));
        }

        let mut queue = self.read_data_queue.lock().unwrap();
        if queue.is_empty() {
            // データがない場合はタイムアウト
            return Err(PortError::Timeout);
        }
        let data = queue.remove(0);
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}
