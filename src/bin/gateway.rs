//! WiFi / HTTP ゲートウェイ (TinyS3)
//!
//! WiFi に接続して NTP で時刻を合わせ、UART 経由でコーディネータに
//! トリガー・時刻同期・ステータス要求を送ります。PIR センサーの検知で
//! 接続中のプロップを自動で鳴らし、Web ページから手動でも鳴らせます。

use anyhow::{Context, Result};
use embedded_svc::http::Method;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
use esp_idf_svc::io::Write;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::{EspSntp, SntpConf, SyncStatus};
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zigbeeween::clock::SystemWallClock;
use zigbeeween::display::{lines, LogDisplay};
use zigbeeween::gateway::http::{respond, ROUTES};
use zigbeeween::gateway::{route, GatewayError, GatewayTimers, HttpMethod};
use zigbeeween::link::uart::UartLink;
use zigbeeween::time_sync::{retry_forever, wait_for_time};
use zigbeeween::{AppConfig, GatewayConfig, GatewayController, LinkConfig};

type Gateway = GatewayController<UartLink<'static>, SystemWallClock, LogDisplay>;

const HTTP_STACK_SIZE: usize = 10240;
const TASK_STACK_SIZE: usize = 8192;
/// WiFi 接続の確認間隔
const WIFI_CHECK_INTERVAL_MS: u32 = 1000;

/// WiFi に接続する（STA, WPA2）
fn connect_wifi(
    wifi: &mut BlockingWifi<EspWifi<'static>>,
    ssid: &str,
    password: &str,
) -> Result<(), GatewayError> {
    let wifi_error = |e: esp_idf_svc::sys::EspError| GatewayError::Wifi(e.to_string());

    let configuration = Configuration::Client(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| GatewayError::Wifi("Invalid SSID".to_string()))?,
        bssid: None,
        auth_method: AuthMethod::WPA2Personal,
        password: password
            .try_into()
            .map_err(|_| GatewayError::Wifi("Invalid password".to_string()))?,
        channel: None,
        ..Default::default()
    });
    wifi.set_configuration(&configuration).map_err(wifi_error)?;

    if !wifi.is_started().map_err(wifi_error)? {
        wifi.start().map_err(wifi_error)?;
        info!("WiFi started");
    }
    wifi.connect().map_err(wifi_error)?;
    info!("WiFi connected");
    wifi.wait_netif_up().map_err(wifi_error)?;
    info!("WiFi netif up");
    Ok(())
}

/// 待機表示（SSID / IP アドレス）
fn show_network(gateway: &Gateway, wifi: &BlockingWifi<EspWifi<'static>>, ssid: &str) {
    match wifi.wifi().sta_netif().get_ip_info() {
        Ok(ip_info) => {
            info!("WiFi DHCP info: {:?}", ip_info);
            gateway.set_idle_lines(ssid, &ip_info.ip.to_string());
        }
        Err(e) => {
            warn!("Could not read IP address: {}", e);
            gateway.set_idle_lines(ssid, "");
        }
    }
}

fn setup_http_server(gateway: Arc<Gateway>) -> Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&HttpConfiguration {
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    })?;

    for (method, path) in ROUTES {
        let esp_method = match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
            HttpMethod::Other => continue,
        };
        let gateway = gateway.clone();
        server.fn_handler::<anyhow::Error, _>(path, esp_method, move |req| {
            let response = respond(&gateway, route(method, path));
            let headers = response.headers();
            req.into_response(response.status, None, &headers)?
                .write_all(response.body.as_bytes())?;
            Ok(())
        })?;
        info!("HTTP route registered: {:?} {}", method, path);
    }

    Ok(server)
}

/// シリアルリンクの受信と定期処理
fn link_loop(gateway: Arc<Gateway>, started: Instant) {
    let mut timers = GatewayTimers::new(gateway.config(), 0);
    loop {
        if let Err(e) = gateway.poll_link() {
            error!("Serial link error: {}", e);
            FreeRtos::delay_ms(50);
        }
        let now_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = gateway.run_timers(&mut timers, now_ms) {
            error!("Periodic task failed: {}", e);
        }
    }
}

fn main() -> Result<()> {
    // ESP-IDFシステムの初期化
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let app_config = AppConfig::from_cfg().context("invalid cfg.toml")?;
    app_config.require_wifi()?;
    log::set_max_level(app_config.log_level);

    info!("Starting Zigbee Halloween gateway...");
    let started = Instant::now();

    let peripherals = Peripherals::take().context("failed to take peripherals")?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // 外部アンテナを使う (HIGH = 外部)
    let mut antenna = PinDriver::output(peripherals.pins.gpio38)?;
    antenna.set_high()?;

    // TX: GPIO43 -> コーディネータ RX, RX: GPIO44 <- コーディネータ TX
    let link_config = LinkConfig::default();
    let link = UartLink::new(
        peripherals.uart1,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        &link_config,
    )
    .context("failed to initialize UART link")?;

    let gateway_config = GatewayConfig {
        timezone: app_config.timezone,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(GatewayController::new(
        link,
        SystemWallClock,
        LogDisplay,
        gateway_config,
        link_config,
    ));
    gateway.show(lines::STARTING.0, lines::STARTING.1);

    let pir = PinDriver::input(peripherals.pins.gpio1)?;

    // WiFi（つながるまで再試行）
    gateway.show(lines::WIFI.0, lines::WIFI.1);
    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;
    let backoff = Duration::from_millis(gateway_config.wifi_retry_backoff_ms);
    retry_forever(
        "WiFi connect",
        backoff,
        || connect_wifi(&mut wifi, &app_config.wifi_ssid, &app_config.wifi_password),
        std::thread::sleep,
    );
    show_network(&gateway, &wifi, &app_config.wifi_ssid);

    // NTP（時刻なしでは動かさない）
    gateway.show(lines::TIME_SYNC.0, lines::TIME_SYNC.1);
    let mut sntp_conf = SntpConf::default();
    sntp_conf.servers[0] = app_config.ntp_server.as_str();
    let sntp = EspSntp::new(&sntp_conf)?;
    if let Err(e) = wait_for_time(
        || sntp.get_sync_status() == SyncStatus::Completed,
        gateway_config.ntp_timeout_secs,
        std::thread::sleep,
    ) {
        gateway.show(lines::NTP_FAILED.0, lines::NTP_FAILED.1);
        return Err(e).context("cannot start without wall clock");
    }
    gateway.mark_time_synced();
    if let Err(e) = gateway.push_time() {
        warn!("Initial time sync failed: {}", e);
    }

    gateway.show(lines::WEB_SERVER.0, lines::WEB_SERVER.1);
    let _server = setup_http_server(gateway.clone())?;
    show_network(&gateway, &wifi, &app_config.wifi_ssid);
    info!("System ready!");

    {
        let gateway = gateway.clone();
        std::thread::Builder::new()
            .name("link".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || link_loop(gateway, started))
            .context("failed to spawn link task")?;
    }
    {
        let gateway = gateway.clone();
        let poll_ms = gateway_config.sensor_poll_ms as u32;
        std::thread::Builder::new()
            .name("pir".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || loop {
                let now_ms = started.elapsed().as_millis() as u64;
                if let Err(e) = gateway.on_motion(pir.is_high(), now_ms) {
                    error!("Motion trigger failed: {}", e);
                }
                FreeRtos::delay_ms(poll_ms);
            })
            .context("failed to spawn PIR task")?;
    }

    // WiFi の見張り
    loop {
        FreeRtos::delay_ms(WIFI_CHECK_INTERVAL_MS);
        if wifi.is_connected().unwrap_or(false) {
            continue;
        }
        warn!("WiFi disconnected, reconnecting...");
        retry_forever(
            "WiFi reconnect",
            backoff,
            || connect_wifi(&mut wifi, &app_config.wifi_ssid, &app_config.wifi_password),
            std::thread::sleep,
        );
        show_network(&gateway, &wifi, &app_config.wifi_ssid);
    }
}
