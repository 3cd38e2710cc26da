/*!
 * # Zigbeeween
 *
 * ハロウィン用プロップ（墓石・かかし）を Zigbee で連携させるためのライブラリ
 *
 * ## モジュール構成
 * - `link`: ゲートウェイ ⇔ コーディネータ間のシリアルフレームプロトコル
 * - `device`: プロップの識別子と許可リスト
 * - `registry`: コーディネータのデバイス登録表（接続・時刻同期・クールダウン）
 * - `zigbee`: Zigbee 無線スタックの抽象化
 * - `dispatcher`: コーディネータのイベント処理
 * - `gateway`: WiFi/HTTP ゲートウェイ側の制御
 * - `time_sync`: 時刻配信
 * - `prop`: エンドデバイス（プロップ）側のロジック
 * - `config`: ビルド時設定と実行時設定
 */

pub mod clock;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod display;
pub mod gateway;
pub mod link;
pub mod prop;
pub mod registry;
pub mod time_sync;
pub mod zigbee;

pub use config::{AppConfig, ConfigError, CoordinatorConfig, GatewayConfig, LinkConfig};
pub use device::{AllowList, DeviceId};
pub use dispatcher::{CoordinatorState, Dispatcher};
pub use gateway::GatewayController;
pub use link::{FrameReceiver, LinkFrame, LinkPort, TriggerTarget};
pub use registry::{DeviceRecord, Registry, COOLDOWN_SECONDS};

/// ライブラリのバージョン情報
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
