//! Zigbee コーディネータ (XIAO ESP32C6)
//!
//! Zigbee ネットワークを形成してプロップを受け入れ、UART でつながった
//! ゲートウェイからのトリガー・時刻同期・ステータス要求を処理します。

use anyhow::{Context, Result};
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use zigbeeween::clock::SystemWallClock;
use zigbeeween::device::format_ieee;
use zigbeeween::display::LogDisplay;
use zigbeeween::link::uart::UartLink;
use zigbeeween::zigbee::esp::EspZigbeeRadio;
use zigbeeween::zigbee::RadioEvent;
use zigbeeween::{
    AppConfig, CoordinatorConfig, CoordinatorState, Dispatcher, FrameReceiver, LinkConfig, Registry,
};

type CoordinatorDispatcher = Dispatcher<EspZigbeeRadio, SystemWallClock>;

const TASK_STACK_SIZE: usize = 8192;

/// Zigbee スタックからのイベントを順に処理
fn radio_event_loop(dispatcher: Arc<CoordinatorDispatcher>, events: Receiver<RadioEvent>) {
    info!("Zigbee event loop started");
    for event in events {
        dispatcher.handle_radio_event(event);
    }
    warn!("Zigbee event channel closed");
}

/// 近隣テーブルの定期照合
fn neighbor_scan_loop(dispatcher: Arc<CoordinatorDispatcher>, interval_ms: u64) {
    loop {
        FreeRtos::delay_ms(interval_ms as u32);
        if dispatcher.state() != CoordinatorState::Running {
            continue;
        }
        let registered = dispatcher.reconcile_neighbors();
        if !registered.is_empty() {
            info!("Neighbor scan registered {:?}", registered);
        }
    }
}

fn main() -> Result<()> {
    // ESP-IDFシステムの初期化
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let app_config = AppConfig::from_cfg().context("invalid cfg.toml")?;
    log::set_max_level(app_config.log_level);

    info!("Starting Zigbee coordinator...");
    for known in app_config.allow_list.entries() {
        info!("  {}: {}", known.id, format_ieee(known.hardware_identity));
    }

    let peripherals = Peripherals::take().context("failed to take peripherals")?;
    // Zigbee スタックのネットワーク情報は NVS に保存される
    let _nvs = EspDefaultNvsPartition::take()?;

    // TX: D6 (GPIO16) -> ゲートウェイ RX, RX: D7 (GPIO17) <- ゲートウェイ TX
    let link_config = LinkConfig::default();
    let mut link = UartLink::new(
        peripherals.uart1,
        peripherals.pins.gpio16,
        peripherals.pins.gpio17,
        &link_config,
    )
    .context("failed to initialize UART link")?;
    info!("✓ UART link initialized");

    let coordinator_config = CoordinatorConfig {
        channel: app_config.zigbee_channel,
        ..CoordinatorConfig::default()
    };
    let (radio, events) =
        EspZigbeeRadio::init(&coordinator_config).context("failed to start Zigbee stack")?;

    let registry = Arc::new(Registry::new(&app_config.allow_list));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        app_config.allow_list.clone(),
        radio,
        SystemWallClock,
        coordinator_config,
    ));
    dispatcher.set_display(Box::new(LogDisplay));

    {
        let dispatcher = dispatcher.clone();
        std::thread::Builder::new()
            .name("zb_events".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || radio_event_loop(dispatcher, events))
            .context("failed to spawn zigbee event task")?;
    }
    {
        let dispatcher = dispatcher.clone();
        let interval_ms = coordinator_config.neighbor_scan_interval_ms;
        std::thread::Builder::new()
            .name("nbr_scan".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || neighbor_scan_loop(dispatcher, interval_ms))
            .context("failed to spawn neighbor scan task")?;
    }

    info!("Entering serial link loop...");
    let mut receiver = FrameReceiver::new(link_config.carry_partial_frames);
    loop {
        match dispatcher.poll_link(&mut link, &mut receiver, link_config.read_timeout_ms) {
            Ok(_) => {}
            Err(e) => {
                error!("Serial link error: {}", e);
                FreeRtos::delay_ms(50);
            }
        }
    }
}
