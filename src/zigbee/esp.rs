/// esp-zigbee-lib を使ったコーディネータ無線
///
/// スタックは専用スレッドで `esp_zb_stack_main_loop` を回し、シグナルと
/// 属性書き込みは C コールバックからチャンネル経由で Dispatcher に渡します。
/// コールバックの中では何も判断しません（キューに積むだけ）。

use super::{
    attribute, cluster, AttributeValue, AttributeWrite, CommissioningMode, Neighbor, RadioError,
    RadioEvent, RadioResult, ZigbeeRadio, ZigbeeSignal, COORDINATOR_ENDPOINT, EXTENDED_PAN_ID,
    NETWORK_KEY, ON_OFF_TOGGLE_COMMAND,
};
use crate::config::CoordinatorConfig;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::sys::{self, esp, EspError};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::ffi::c_void;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

/// コールバックからのイベントキューの大きさ
const EVENT_QUEUE_SIZE: usize = 32;

/// スタックのロック待ち
const LOCK_TIMEOUT_MS: u64 = 1000;

const STACK_THREAD_STACK_SIZE: usize = 8192;
const MAX_CHILDREN: u8 = 10;

// ZCL / APS の定数
const CLUSTER_SERVER_ROLE: u8 = 0x01;
const CLUSTER_CLIENT_ROLE: u8 = 0x02;
const ATTR_TYPE_U8: u8 = 0x20;
const ATTR_TYPE_U16: u8 = 0x21;
const ATTR_TYPE_U32: u8 = 0x23;
const ATTR_ACCESS_READ_WRITE: u8 = 0x03;
const HA_PROFILE_ID: u16 = 0x0104;
const ON_OFF_SWITCH_DEVICE_ID: u16 = 0x0000;
const APS_ADDR_MODE_16_ENDP_PRESENT: u8 = 0x02;

static EVENT_SINK: OnceCell<SyncSender<RadioEvent>> = OnceCell::new();

impl From<EspError> for RadioError {
    fn from(error: EspError) -> Self {
        RadioError::CommandFailed(format!("ESP-IDF error: {}", error))
    }
}

/// コールバックからイベントを積む
fn emit(event: RadioEvent) {
    let Some(sink) = EVENT_SINK.get() else {
        warn!("Zigbee event before radio init: {:?}", event);
        return;
    };
    match sink.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => warn!("Zigbee event queue full, dropping {:?}", event),
        Err(TrySendError::Disconnected(event)) => {
            warn!("Zigbee event receiver gone, dropping {:?}", event)
        }
    }
}

/// esp-zigbee-lib のコーディネータ
#[derive(Debug)]
pub struct EspZigbeeRadio {
    lock_timeout_ticks: u32,
}

impl EspZigbeeRadio {
    /// スタックを起動し、無線とイベントの受け口を返す
    ///
    /// 1回だけ呼べます。
    pub fn init(config: &CoordinatorConfig) -> RadioResult<(Self, Receiver<RadioEvent>)> {
        let (tx, rx) = sync_channel(EVENT_QUEUE_SIZE);
        EVENT_SINK
            .set(tx)
            .map_err(|_| RadioError::CommandFailed("zigbee radio already initialized".to_string()))?;

        let channel = config.channel;
        std::thread::Builder::new()
            .name("zigbee_main".to_string())
            .stack_size(STACK_THREAD_STACK_SIZE)
            .spawn(move || {
                if let Err(e) = unsafe { run_stack(channel) } {
                    error!("Zigbee stack stopped: {}", e);
                }
            })
            .map_err(|e| RadioError::CommandFailed(format!("failed to spawn zigbee task: {}", e)))?;

        info!("Zigbee stack task started (channel {})", channel);
        Ok((
            Self {
                lock_timeout_ticks: TickType::new_millis(LOCK_TIMEOUT_MS).ticks(),
            },
            rx,
        ))
    }

    /// スタックのロックを取って `f` を実行
    fn locked<T>(&self, f: impl FnOnce() -> RadioResult<T>) -> RadioResult<T> {
        if !unsafe { sys::esp_zb_lock_acquire(self.lock_timeout_ticks) } {
            return Err(RadioError::LockTimeout);
        }
        let result = f();
        unsafe { sys::esp_zb_lock_release() };
        result
    }
}

impl ZigbeeRadio for EspZigbeeRadio {
    fn start_commissioning(&self, mode: CommissioningMode) -> RadioResult<()> {
        debug!("Start commissioning {:?}", mode);
        self.locked(|| {
            esp!(unsafe { sys::esp_zb_bdb_start_top_level_commissioning(mode.mask()) })?;
            Ok(())
        })
    }

    fn schedule_commissioning(&self, mode: CommissioningMode, delay_ms: u32) -> RadioResult<()> {
        self.locked(|| {
            unsafe { sys::esp_zb_scheduler_alarm(Some(commissioning_alarm), mode.mask(), delay_ms) };
            Ok(())
        })
    }

    fn send_toggle(&self, short: u16, endpoint: u8) -> RadioResult<()> {
        self.locked(|| {
            let mut cmd: sys::esp_zb_zcl_on_off_cmd_t = unsafe { core::mem::zeroed() };
            cmd.zcl_basic_cmd.dst_addr_u.addr_short = short;
            cmd.zcl_basic_cmd.dst_endpoint = endpoint;
            cmd.zcl_basic_cmd.src_endpoint = COORDINATOR_ENDPOINT;
            cmd.address_mode = APS_ADDR_MODE_16_ENDP_PRESENT as _;
            cmd.on_off_cmd_id = ON_OFF_TOGGLE_COMMAND;
            let tsn = unsafe { sys::esp_zb_zcl_on_off_cmd_req(&mut cmd) };
            debug!("Toggle -> 0x{:04X}/{} (tsn {})", short, endpoint, tsn);
            Ok(())
        })
    }

    fn write_time(&self, short: u16, endpoint: u8, unix: u32) -> RadioResult<()> {
        self.locked(|| {
            // 値はリクエスト作成時にコピーされる
            let mut value = unix;
            let mut attr: sys::esp_zb_zcl_attribute_t = unsafe { core::mem::zeroed() };
            attr.id = attribute::TIME_SYNC_UNIX;
            attr.data.type_ = ATTR_TYPE_U32 as _;
            attr.data.size = core::mem::size_of::<u32>() as _;
            attr.data.value = &mut value as *mut u32 as *mut c_void;

            let mut cmd: sys::esp_zb_zcl_write_attr_cmd_t = unsafe { core::mem::zeroed() };
            cmd.zcl_basic_cmd.dst_addr_u.addr_short = short;
            cmd.zcl_basic_cmd.dst_endpoint = endpoint;
            cmd.zcl_basic_cmd.src_endpoint = COORDINATOR_ENDPOINT;
            cmd.address_mode = APS_ADDR_MODE_16_ENDP_PRESENT as _;
            cmd.clusterID = cluster::TIME_SYNC;
            cmd.attr_number = 1;
            cmd.attr_field = &mut attr;
            let tsn = unsafe { sys::esp_zb_zcl_write_attr_cmd_req(&mut cmd) };
            debug!("Time {} -> 0x{:04X}/{} (tsn {})", unix, short, endpoint, tsn);
            Ok(())
        })
    }

    fn neighbors(&self) -> RadioResult<Vec<Neighbor>> {
        self.locked(|| {
            let mut iterator: sys::esp_zb_nwk_info_iterator_t = 0;
            let mut info: sys::esp_zb_nwk_neighbor_info_t = unsafe { core::mem::zeroed() };
            let mut neighbors = Vec::new();
            while unsafe { sys::esp_zb_nwk_get_next_neighbor(&mut iterator, &mut info) }
                == sys::ESP_OK as sys::esp_err_t
            {
                neighbors.push(Neighbor {
                    ieee: u64::from_le_bytes(info.ieee_addr),
                    short: info.short_addr,
                });
            }
            Ok(neighbors)
        })
    }
}

/// スタックの初期化とメインループ（戻らない）
unsafe fn run_stack(channel: u8) -> Result<(), EspError> {
    let mut platform: sys::esp_zb_platform_config_t = core::mem::zeroed();
    platform.radio_config.radio_mode = sys::esp_zb_radio_mode_t_ZB_RADIO_MODE_NATIVE;
    platform.host_config.host_connection_mode =
        sys::esp_zb_host_connection_mode_t_ZB_HOST_CONNECTION_MODE_NONE;
    esp!(sys::esp_zb_platform_config(&mut platform))?;

    let mut cfg: sys::esp_zb_cfg_t = core::mem::zeroed();
    cfg.esp_zb_role = sys::esp_zb_nwk_device_type_t_ESP_ZB_DEVICE_TYPE_COORDINATOR;
    cfg.install_code_policy = false;
    cfg.nwk_cfg.zczr_cfg.max_children = MAX_CHILDREN;
    sys::esp_zb_init(&mut cfg);

    let ep_list = sys::esp_zb_ep_list_create();
    let cluster_list = sys::esp_zb_zcl_cluster_list_create();

    let basic = sys::esp_zb_basic_cluster_create(core::ptr::null_mut());
    sys::esp_zb_cluster_list_add_basic_cluster(cluster_list, basic, CLUSTER_SERVER_ROLE);
    let identify = sys::esp_zb_identify_cluster_create(core::ptr::null_mut());
    sys::esp_zb_cluster_list_add_identify_cluster(cluster_list, identify, CLUSTER_SERVER_ROLE);

    // On/Off はクライアント（トグルを送る側）
    let on_off = sys::esp_zb_on_off_cluster_create(core::ptr::null_mut());
    sys::esp_zb_cluster_list_add_on_off_cluster(cluster_list, on_off, CLUSTER_CLIENT_ROLE);

    let time_sync = sys::esp_zb_zcl_attr_list_create(cluster::TIME_SYNC);
    let mut time_value: u32 = 0;
    sys::esp_zb_custom_cluster_add_custom_attr(
        time_sync,
        attribute::TIME_SYNC_UNIX,
        ATTR_TYPE_U32,
        ATTR_ACCESS_READ_WRITE,
        &mut time_value as *mut u32 as *mut c_void,
    );
    sys::esp_zb_cluster_list_add_custom_cluster(cluster_list, time_sync, CLUSTER_CLIENT_ROLE);

    // かかしが書き込むトリガー要求
    let trigger_request = sys::esp_zb_zcl_attr_list_create(cluster::TRIGGER_REQUEST);
    let mut request_value: u8 = 0;
    sys::esp_zb_custom_cluster_add_custom_attr(
        trigger_request,
        attribute::TRIGGER_REQUEST_VALUE,
        ATTR_TYPE_U8,
        ATTR_ACCESS_READ_WRITE,
        &mut request_value as *mut u8 as *mut c_void,
    );
    sys::esp_zb_cluster_list_add_custom_cluster(cluster_list, trigger_request, CLUSTER_SERVER_ROLE);

    let endpoint_config = sys::esp_zb_endpoint_config_t {
        endpoint: COORDINATOR_ENDPOINT,
        app_profile_id: HA_PROFILE_ID,
        app_device_id: ON_OFF_SWITCH_DEVICE_ID,
        app_device_version: 0,
    };
    sys::esp_zb_ep_list_add_ep(ep_list, cluster_list, endpoint_config);
    sys::esp_zb_device_register(ep_list);
    sys::esp_zb_core_action_handler_register(Some(action_handler));

    sys::esp_zb_set_primary_network_channel_set(1u32 << channel);
    let mut extended_pan_id = EXTENDED_PAN_ID;
    sys::esp_zb_set_extended_pan_id(extended_pan_id.as_mut_ptr());
    let mut network_key = NETWORK_KEY;
    sys::esp_zb_secur_network_key_set(network_key.as_mut_ptr());

    esp!(sys::esp_zb_start(false))?;
    info!("Zigbee stack started, entering main loop");
    sys::esp_zb_stack_main_loop();
    Ok(())
}

/// `esp_zb_scheduler_alarm` から呼ばれる（スタックのコンテキスト）
unsafe extern "C" fn commissioning_alarm(mode_mask: u8) {
    let result = sys::esp_zb_bdb_start_top_level_commissioning(mode_mask);
    if result != sys::ESP_OK as sys::esp_err_t {
        warn!("Scheduled commissioning 0x{:02X} failed: {}", mode_mask, result);
    }
}

/// esp-zigbee-lib が名前で呼び出すシグナルハンドラ
#[no_mangle]
pub unsafe extern "C" fn esp_zb_app_signal_handler(signal_struct: *mut sys::esp_zb_app_signal_t) {
    if signal_struct.is_null() {
        return;
    }
    let signal = decode_signal(&*signal_struct);
    debug!("Zigbee signal: {:?}", signal);
    emit(RadioEvent::Signal(signal));
}

unsafe fn decode_signal(signal: &sys::esp_zb_app_signal_t) -> ZigbeeSignal {
    let p_sg_p = signal.p_app_signal;
    let ok = signal.esp_err_status == sys::ESP_OK as sys::esp_err_t;
    if p_sg_p.is_null() {
        return ZigbeeSignal::Other { code: u32::MAX, ok };
    }
    let code = *p_sg_p as u32;

    match code {
        c if c == sys::esp_zb_app_signal_type_t_ESP_ZB_ZDO_SIGNAL_SKIP_STARTUP as u32 => {
            ZigbeeSignal::SkipStartup
        }
        c if c == sys::esp_zb_app_signal_type_t_ESP_ZB_BDB_SIGNAL_DEVICE_FIRST_START as u32 => {
            ZigbeeSignal::DeviceFirstStart { ok }
        }
        c if c == sys::esp_zb_app_signal_type_t_ESP_ZB_BDB_SIGNAL_DEVICE_REBOOT as u32 => {
            ZigbeeSignal::DeviceReboot { ok }
        }
        c if c == sys::esp_zb_app_signal_type_t_ESP_ZB_BDB_SIGNAL_FORMATION as u32 => {
            ZigbeeSignal::Formation { ok }
        }
        c if c == sys::esp_zb_app_signal_type_t_ESP_ZB_BDB_SIGNAL_STEERING as u32 => {
            ZigbeeSignal::Steering { ok }
        }
        c if ok && c == sys::esp_zb_app_signal_type_t_ESP_ZB_ZDO_SIGNAL_DEVICE_ANNCE as u32 => {
            let params = sys::esp_zb_app_signal_get_params(p_sg_p)
                as *const sys::esp_zb_zdo_signal_device_annce_params_t;
            match params.as_ref() {
                Some(params) => ZigbeeSignal::DeviceAnnounce {
                    ieee: u64::from_le_bytes(params.ieee_addr),
                    short: params.device_short_addr,
                },
                None => ZigbeeSignal::Other { code, ok },
            }
        }
        c if ok && c == sys::esp_zb_app_signal_type_t_ESP_ZB_ZDO_SIGNAL_LEAVE_INDICATION as u32 => {
            let params = sys::esp_zb_app_signal_get_params(p_sg_p)
                as *const sys::esp_zb_zdo_signal_leave_indication_params_t;
            match params.as_ref() {
                Some(params) => ZigbeeSignal::DeviceLeave {
                    ieee: u64::from_le_bytes(params.device_addr),
                    short: params.short_addr,
                },
                None => ZigbeeSignal::Other { code, ok },
            }
        }
        _ => ZigbeeSignal::Other { code, ok },
    }
}

/// ZCL のアクションコールバック
///
/// 自分の属性への書き込み（トリガー要求）だけを拾います。送信元アドレスは
/// このメッセージには含まれません。
unsafe extern "C" fn action_handler(
    callback_id: sys::esp_zb_core_action_callback_id_t,
    message: *const c_void,
) -> sys::esp_err_t {
    if callback_id == sys::esp_zb_core_action_callback_id_t_ESP_ZB_CORE_SET_ATTR_VALUE_CB_ID
        && !message.is_null()
    {
        let msg = &*(message as *const sys::esp_zb_zcl_set_attr_value_message_t);
        match decode_value(&msg.attribute.data) {
            Some(value) => emit(RadioEvent::AttributeWrite(AttributeWrite {
                source_short: None,
                cluster: msg.info.cluster,
                attribute: msg.attribute.id,
                value,
            })),
            None => debug!(
                "Unsupported attribute type 0x{:02X} (cluster 0x{:04X})",
                msg.attribute.data.type_, msg.info.cluster
            ),
        }
    } else {
        debug!("Receive Zigbee action(0x{:x}) callback", callback_id);
    }
    sys::ESP_OK as sys::esp_err_t
}

unsafe fn decode_value(data: &sys::esp_zb_zcl_attribute_data_t) -> Option<AttributeValue> {
    if data.value.is_null() {
        return None;
    }
    match data.type_ as u8 {
        ATTR_TYPE_U8 => Some(AttributeValue::U8(*(data.value as *const u8))),
        ATTR_TYPE_U16 => Some(AttributeValue::U16((data.value as *const u16).read_unaligned())),
        ATTR_TYPE_U32 => Some(AttributeValue::U32((data.value as *const u32).read_unaligned())),
        _ => None,
    }
}
