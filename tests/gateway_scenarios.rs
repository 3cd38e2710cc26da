//! ゲートウェイとコーディネータをモックのシリアルリンクでつないだシナリオテスト

use std::sync::Arc;
use zigbeeween::clock::ManualClock;
use zigbeeween::device::{RIP_TOMBSTONE_IEEE, SCARECROW_IEEE};
use zigbeeween::display::MockDisplay;
use zigbeeween::gateway::http::respond;
use zigbeeween::gateway::{route, EventKind, GatewayTimers, HttpMethod};
use zigbeeween::link::mock::MockLinkPort;
use zigbeeween::zigbee::mock::MockRadio;
use zigbeeween::zigbee::ZigbeeSignal;
use zigbeeween::{
    AllowList, CoordinatorConfig, DeviceId, Dispatcher, FrameReceiver, GatewayConfig,
    GatewayController, LinkConfig, LinkFrame, Registry, TriggerTarget,
};

const NOW: u64 = 1_761_970_500;

type Gateway = GatewayController<MockLinkPort, ManualClock, MockDisplay>;
type Coordinator = Dispatcher<MockRadio, ManualClock>;

struct Bench {
    gateway: Gateway,
    gateway_port: MockLinkPort,
    display: MockDisplay,
    coordinator: Coordinator,
    coordinator_port: MockLinkPort,
    receiver: FrameReceiver,
    radio: MockRadio,
}

impl Bench {
    fn new() -> Self {
        let gateway_port = MockLinkPort::new();
        let display = MockDisplay::new();
        let gateway = GatewayController::new(
            gateway_port.clone(),
            ManualClock::new(NOW),
            display.clone(),
            GatewayConfig::default(),
            LinkConfig::default(),
        );

        let allow_list = AllowList::default();
        let radio = MockRadio::new();
        let coordinator = Dispatcher::new(
            Arc::new(Registry::new(&allow_list)),
            allow_list,
            radio.clone(),
            ManualClock::new(0),
            CoordinatorConfig {
                trigger_gap_ms: 0,
                ..CoordinatorConfig::default()
            },
        );

        Self {
            gateway,
            gateway_port,
            display,
            coordinator,
            coordinator_port: MockLinkPort::new(),
            receiver: FrameReceiver::default(),
            radio,
        }
    }

    /// ゲートウェイ → コーディネータ（受信・処理・応答の書き出しまで）
    fn to_coordinator(&mut self) {
        let chunks = self.gateway_port.get_sent_data();
        self.gateway_port.clear_sent_data();
        for chunk in chunks {
            self.coordinator_port.queue_read_data(chunk);
            self.coordinator
                .poll_link(&mut self.coordinator_port, &mut self.receiver, 100)
                .unwrap();
        }
    }

    /// コーディネータ → ゲートウェイ
    fn to_gateway(&mut self) {
        self.coordinator.flush_outbox(&mut self.coordinator_port);
        let chunks = self.coordinator_port.get_sent_data();
        self.coordinator_port.clear_sent_data();
        for chunk in chunks {
            self.gateway_port.queue_read_data(chunk);
            self.gateway.poll_link().unwrap();
        }
    }

    /// PIR のレベルをデバウンス時間いっぱい保持する
    fn hold_motion(&self, level: bool, from_ms: u64) -> Option<TriggerTarget> {
        let settle_ms = self.gateway.config().motion_debounce_ms;
        assert_eq!(self.gateway.on_motion(level, from_ms).unwrap(), None);
        self.gateway.on_motion(level, from_ms + settle_ms).unwrap()
    }

    fn join_both(&mut self) {
        self.coordinator.handle_signal(ZigbeeSignal::DeviceAnnounce {
            ieee: RIP_TOMBSTONE_IEEE,
            short: 0x1001,
        });
        self.coordinator.handle_signal(ZigbeeSignal::DeviceAnnounce {
            ieee: SCARECROW_IEEE,
            short: 0x2002,
        });
        self.to_gateway();
    }
}

#[test]
fn test_time_flows_from_gateway_to_props() {
    let mut bench = Bench::new();
    bench.join_both();
    assert!(bench.radio.time_writes().is_empty());

    bench.gateway.mark_time_synced();
    assert!(bench.gateway.push_time().unwrap());
    bench.to_coordinator();

    assert!(bench.coordinator.is_clock_synced());
    assert_eq!(
        bench.radio.time_writes(),
        vec![(0x1001, NOW as u32), (0x2002, NOW as u32)]
    );
}

#[test]
fn test_status_poll_updates_gateway_snapshot() {
    let mut bench = Bench::new();
    bench.join_both();
    bench.gateway.mark_time_synced();
    bench.gateway.push_time().unwrap();
    bench.to_coordinator();

    let mut timers = GatewayTimers::new(bench.gateway.config(), 0);
    bench.gateway.run_timers(&mut timers, 1_999).unwrap();
    assert!(bench.gateway_port.get_sent_data().is_empty());
    bench.gateway.run_timers(&mut timers, 2_000).unwrap();
    assert_eq!(bench.gateway_port.sent_frames(), vec![LinkFrame::StatusRequest]);

    bench.to_coordinator();
    bench.to_gateway();

    let snapshot = bench.gateway.snapshot();
    assert_eq!(snapshot.status_age_secs, Some(0));
    for id in DeviceId::ALL {
        let status = snapshot.device(id);
        assert!(status.connected);
        assert!(status.time_synced);
        assert!(!status.in_cooldown);
    }
}

#[test]
fn test_motion_triggers_connected_props_end_to_end() {
    let mut bench = Bench::new();
    bench.join_both();
    bench.gateway.request_status().unwrap();
    bench.to_coordinator();
    bench.to_gateway();

    assert_eq!(bench.hold_motion(true, 0), Some(TriggerTarget::Both));
    assert_eq!(
        bench.display.last(),
        Some(("MOTION!".to_string(), "DETECTED".to_string()))
    );
    bench.to_coordinator();
    assert_eq!(bench.radio.toggles(), vec![(0x1001, 1), (0x2002, 1)]);

    // 立ち下がりでは何も送らない
    assert_eq!(bench.hold_motion(false, 5_000), None);
    assert!(bench.gateway_port.get_sent_data().is_empty());

    let kinds: Vec<EventKind> = bench.gateway.snapshot().events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::MotionStopped,
            EventKind::TriggerBoth,
            EventKind::MotionDetected,
            EventKind::DeviceJoined,
            EventKind::DeviceJoined,
        ]
    );
}

#[test]
fn test_motion_without_connected_props_sends_nothing() {
    let bench = Bench::new();
    assert_eq!(bench.hold_motion(true, 0), None);
    assert!(bench.gateway_port.get_sent_data().is_empty());
}

#[test]
fn test_glitching_pir_triggers_props_once() {
    let mut bench = Bench::new();
    bench.join_both();
    bench.gateway.request_status().unwrap();
    bench.to_coordinator();
    bench.to_gateway();

    // 検知が一瞬途切れても同じ動きとして扱う
    let levels = [true, true, true, false, true, true, false, true, true, true];
    for (i, level) in levels.into_iter().enumerate() {
        bench.gateway.on_motion(level, i as u64 * 100).unwrap();
    }
    bench.to_coordinator();
    assert_eq!(bench.radio.toggles(), vec![(0x1001, 1), (0x2002, 1)]);

    // 人が離れて確定した後の新しい検知は、もう一度鳴らす
    assert_eq!(bench.hold_motion(false, 2_000), None);
    assert_eq!(bench.hold_motion(true, 4_000), Some(TriggerTarget::Both));
    bench.to_coordinator();
    assert_eq!(bench.radio.toggles().len(), 4);
}

#[test]
fn test_prop_joined_before_clock_sync_catches_up() {
    let mut bench = Bench::new();
    bench.join_both();
    bench.gateway.mark_time_synced();

    // ステータスで「接続中・未同期」を見たゲートウェイが時刻を送り直す
    bench.gateway.request_status().unwrap();
    bench.to_coordinator();
    bench.to_gateway();
    bench.to_coordinator();

    assert_eq!(
        bench.radio.time_writes(),
        vec![(0x1001, NOW as u32), (0x2002, NOW as u32)]
    );
    assert!(bench
        .coordinator
        .registry()
        .records()
        .iter()
        .all(|record| record.time_synced));
}

#[test]
fn test_manual_trigger_over_http_reaches_coordinator() {
    let mut bench = Bench::new();
    bench.join_both();

    let response = respond(&bench.gateway, route(HttpMethod::Post, "/trigger/halloween"));
    assert_eq!(response.status, 303);
    bench.to_coordinator();
    assert_eq!(bench.radio.toggles(), vec![(0x2002, 1)]);

    let response = respond(&bench.gateway, route(HttpMethod::Get, "/api/status"));
    let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(value["events"][0]["type"], "trigger_halloween");
    assert_eq!(value["events"][1]["device"], "Haunted Pumpkin Scarecrow");
}
