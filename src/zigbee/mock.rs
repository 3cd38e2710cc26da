use super::{CommissioningMode, Neighbor, RadioError, RadioResult, ZigbeeRadio};
use std::sync::{Arc, Mutex};

/// MockRadio が記録するコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand {
    StartCommissioning(CommissioningMode),
    ScheduleCommissioning { mode: CommissioningMode, delay_ms: u32 },
    Toggle { short: u16, endpoint: u8 },
    WriteTime { short: u16, endpoint: u8, unix: u32 },
}

/// テスト用の Zigbee 無線モック
///
/// 送ったコマンドを記録し、近隣テーブルはテストから設定します。
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    pub commands: Arc<Mutex<Vec<RadioCommand>>>,
    pub neighbor_table: Arc<Mutex<Vec<Neighbor>>>,
    pub simulate_command_error: Arc<Mutex<bool>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// テスト用: 記録されたコマンドを取得
    pub fn get_commands(&self) -> Vec<RadioCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// テスト用: トグルコマンドだけを取得
    pub fn toggles(&self) -> Vec<(u16, u8)> {
        self.get_commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                RadioCommand::Toggle { short, endpoint } => Some((short, endpoint)),
                _ => None,
            })
            .collect()
    }

    /// テスト用: 時刻書き込みだけを取得
    pub fn time_writes(&self) -> Vec<(u16, u32)> {
        self.get_commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                RadioCommand::WriteTime { short, unix, .. } => Some((short, unix)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// テスト用: 近隣テーブルを設定
    pub fn set_neighbors(&self, neighbors: Vec<Neighbor>) {
        *self.neighbor_table.lock().unwrap() = neighbors;
    }

    /// テスト用: コマンド送信エラーをシミュレート
    pub fn set_command_error(&self, enable: bool) {
        *self.simulate_command_error.lock().unwrap() = enable;
    }

    fn record(&self, command: RadioCommand) -> RadioResult<()> {
        if *self.simulate_command_error.lock().unwrap() {
            return Err(RadioError::CommandFailed("Simulated command error".to_string()));
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

impl ZigbeeRadio for MockRadio {
    fn start_commissioning(&self, mode: CommissioningMode) -> RadioResult<()> {
        self.record(RadioCommand::StartCommissioning(mode))
    }

    fn schedule_commissioning(&self, mode: CommissioningMode, delay_ms: u32) -> RadioResult<()> {
        self.record(RadioCommand::ScheduleCommissioning { mode, delay_ms })
    }

    fn send_toggle(&self, short: u16, endpoint: u8) -> RadioResult<()> {
        self.record(RadioCommand::Toggle { short, endpoint })
    }

    fn write_time(&self, short: u16, endpoint: u8, unix: u32) -> RadioResult<()> {
        self.record(RadioCommand::WriteTime {
            short,
            endpoint,
            unix,
        })
    }

    fn neighbors(&self) -> RadioResult<Vec<Neighbor>> {
        Ok(self.neighbor_table.lock().unwrap().clone())
    }
}
