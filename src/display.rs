/// 2行表示（OLED）の抽象化
///
/// 描画そのものは扱わず、「1行目・2行目に文字列を出す」だけを受け持ちます。

use log::info;

/// 1行に表示できる最大文字数（128px 幅、倍角フォント）
pub const LINE_WIDTH: usize = 10;

/// 2行表示のトレイト
pub trait StatusDisplay: Send {
    fn show(&mut self, line1: &str, line2: &str);
}

/// 表示幅に切り詰める
pub fn fit_line(text: &str) -> &str {
    match text.char_indices().nth(LINE_WIDTH) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// ログに出すだけの表示（画面のないボード用）
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show(&mut self, line1: &str, line2: &str) {
        info!("[display] {} / {}", fit_line(line1), fit_line(line2));
    }
}

/// 表示内容
pub mod lines {
    use crate::device::DeviceId;

    pub const MOTION: (&str, &str) = ("MOTION!", "DETECTED");
    pub const STARTING: (&str, &str) = ("Starting...", "");
    pub const WIFI: (&str, &str) = ("WiFi...", "");
    pub const TIME_SYNC: (&str, &str) = ("Time sync...", "");
    pub const WEB_SERVER: (&str, &str) = ("Web server...", "");
    pub const NTP_FAILED: (&str, &str) = ("NTP", "FAILED");
    pub const ZIGBEE: (&str, &str) = ("Zigbee...", "");
    pub const READY: (&str, &str) = ("Ready!", "");

    fn short_name(id: DeviceId) -> &'static str {
        match id {
            DeviceId::RipTombstone => "RIP",
            DeviceId::Scarecrow => "SCARECROW",
        }
    }

    /// コーディネータ: トリガー送信
    pub fn triggered(id: DeviceId) -> (&'static str, &'static str) {
        match id {
            DeviceId::RipTombstone => ("RIP", "TRIGGER!"),
            DeviceId::Scarecrow => ("HALLOWEEN!", ""),
        }
    }

    /// コーディネータ: 参加
    pub fn joined(id: DeviceId) -> (&'static str, &'static str) {
        (short_name(id), "JOINED")
    }

    /// コーディネータ: 離脱
    pub fn left(id: DeviceId) -> (&'static str, &'static str) {
        (short_name(id), "LEFT")
    }
}

#[cfg(not(feature = "esp"))]
pub use mock::MockDisplay;

#[cfg(not(feature = "esp"))]
mod mock {
    use super::{fit_line, StatusDisplay};
    use std::sync::{Arc, Mutex};

    /// テスト用の表示モック
    #[derive(Debug, Clone, Default)]
    pub struct MockDisplay {
        pub shown: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        /// テスト用: 表示履歴を取得
        pub fn history(&self) -> Vec<(String, String)> {
            self.shown.lock().unwrap().clone()
        }

        /// テスト用: 最後の表示を取得
        pub fn last(&self) -> Option<(String, String)> {
            self.shown.lock().unwrap().last().cloned()
        }
    }

    impl StatusDisplay for MockDisplay {
        fn show(&mut self, line1: &str, line2: &str) {
            self.shown
                .lock()
                .unwrap()
                .push((fit_line(line1).to_string(), fit_line(line2).to_string()));
        }
    }
}
