//! コーディネータのシナリオテスト（MockRadio / MockLinkPort を使用）

use std::sync::Arc;
use zigbeeween::clock::ManualClock;
use zigbeeween::device::{RIP_TOMBSTONE_IEEE, SCARECROW_IEEE};
use zigbeeween::link::mock::MockLinkPort;
use zigbeeween::zigbee::mock::MockRadio;
use zigbeeween::zigbee::{Neighbor, ZigbeeSignal};
use zigbeeween::{
    AllowList, CoordinatorConfig, DeviceId, Dispatcher, FrameReceiver, LinkFrame, Registry,
    TriggerTarget,
};

const NOW: u64 = 1_761_970_500;
const RIP_SHORT: u16 = 0x1A2B;
const SCARECROW_SHORT: u16 = 0x3C4D;

fn coordinator() -> (Dispatcher<MockRadio, ManualClock>, MockRadio, ManualClock) {
    let allow_list = AllowList::default();
    let registry = Arc::new(Registry::new(&allow_list));
    let radio = MockRadio::new();
    let clock = ManualClock::new(NOW);
    let config = CoordinatorConfig {
        trigger_gap_ms: 0,
        ..CoordinatorConfig::default()
    };
    let dispatcher = Dispatcher::new(registry, allow_list, radio.clone(), clock.clone(), config);
    (dispatcher, radio, clock)
}

fn announce(ieee: u64, short: u16) -> ZigbeeSignal {
    ZigbeeSignal::DeviceAnnounce { ieee, short }
}

#[test]
fn test_scarecrow_join_after_sync_pushes_time_and_notifies_gateway() {
    let (dispatcher, radio, _) = coordinator();
    dispatcher.handle_frame(LinkFrame::TimeSync(NOW as u32));

    dispatcher.handle_signal(announce(SCARECROW_IEEE, SCARECROW_SHORT));

    assert_eq!(radio.time_writes(), vec![(SCARECROW_SHORT, NOW as u32)]);
    let frames = dispatcher.drain_outbox();
    assert_eq!(frames, vec![LinkFrame::DeviceJoined(DeviceId::Scarecrow)]);
    assert_eq!(frames[0].encode(), vec![0xAA, 0x30, 0x02, 0x55]);
    assert!(dispatcher.registry().record(DeviceId::Scarecrow).unwrap().time_synced);
}

#[test]
fn test_status_request_reports_both_connected_and_synced() {
    let (dispatcher, _, _) = coordinator();
    let mut port = MockLinkPort::new();
    let mut receiver = FrameReceiver::default();

    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));
    dispatcher.handle_signal(announce(SCARECROW_IEEE, SCARECROW_SHORT));
    dispatcher.drain_outbox();

    // 時刻同期とステータス要求が1回の読み取りで届く
    let mut bytes = LinkFrame::TimeSync(NOW as u32).encode();
    bytes.extend_from_slice(&[0xAA, 0x10, 0x55]);
    port.queue_read_data(bytes);

    assert_eq!(dispatcher.poll_link(&mut port, &mut receiver, 100).unwrap(), 2);
    assert_eq!(port.get_sent_data(), vec![vec![0xAA, 0x11, 0x00, 0x0F, 0x55]]);
}

#[test]
fn test_trigger_both_with_one_bound_prop_sends_one_toggle() {
    let (dispatcher, radio, _) = coordinator();
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));

    dispatcher.handle_frame(LinkFrame::Trigger(TriggerTarget::Both));

    assert_eq!(radio.toggles(), vec![(RIP_SHORT, 1)]);
}

#[test]
fn test_duplicate_join_is_announced_once() {
    let (dispatcher, _, _) = coordinator();
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));

    assert_eq!(
        dispatcher.drain_outbox(),
        vec![LinkFrame::DeviceJoined(DeviceId::RipTombstone)]
    );
}

#[test]
fn test_rejoin_with_new_short_address_updates_target() {
    let (dispatcher, radio, _) = coordinator();
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, 0x7777));

    dispatcher.trigger(TriggerTarget::Rip);
    assert_eq!(radio.toggles(), vec![(0x7777, 1)]);
    assert_eq!(dispatcher.drain_outbox().len(), 1);
}

#[test]
fn test_rejoin_without_leave_pushes_time_again() {
    let (dispatcher, radio, clock) = coordinator();
    dispatcher.handle_frame(LinkFrame::TimeSync(NOW as u32));
    dispatcher.handle_signal(announce(SCARECROW_IEEE, SCARECROW_SHORT));

    // 電源を入れ直したかかしが離脱なしで再参加する
    clock.advance(600);
    dispatcher.handle_signal(announce(SCARECROW_IEEE, SCARECROW_SHORT));

    assert_eq!(
        radio.time_writes(),
        vec![
            (SCARECROW_SHORT, NOW as u32),
            (SCARECROW_SHORT, (NOW + 600) as u32)
        ]
    );
    let record = dispatcher.registry().record(DeviceId::Scarecrow).unwrap();
    assert!(record.time_synced);
    assert_eq!(record.last_time_sync, NOW + 600);
    assert_eq!(
        dispatcher.drain_outbox(),
        vec![LinkFrame::DeviceJoined(DeviceId::Scarecrow)]
    );
}

#[test]
fn test_rejoin_before_clock_sync_leaves_prop_unsynced() {
    let (dispatcher, radio, _) = coordinator();
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));

    assert!(radio.time_writes().is_empty());
    assert!(!dispatcher.registry().record(DeviceId::RipTombstone).unwrap().time_synced);
}

#[test]
fn test_time_syncs_during_cooldown_still_reach_props() {
    let (dispatcher, radio, clock) = coordinator();
    dispatcher.handle_signal(announce(RIP_TOMBSTONE_IEEE, RIP_SHORT));
    dispatcher.trigger(TriggerTarget::Rip);
    assert!(dispatcher
        .registry()
        .record(DeviceId::RipTombstone)
        .unwrap()
        .is_in_cooldown(NOW));

    dispatcher.handle_frame(LinkFrame::TimeSync(NOW as u32));
    clock.advance(30);
    dispatcher.handle_frame(LinkFrame::TimeSync((NOW + 30) as u32));

    assert_eq!(
        radio.time_writes(),
        vec![(RIP_SHORT, NOW as u32), (RIP_SHORT, (NOW + 30) as u32)]
    );
}

#[test]
fn test_neighbor_scan_registers_only_known_props() {
    let (dispatcher, _, _) = coordinator();
    dispatcher.radio().set_neighbors(vec![
        Neighbor {
            ieee: 0x0011_2233_4455_6677,
            short: 0x0BAD,
        },
        Neighbor {
            ieee: SCARECROW_IEEE,
            short: SCARECROW_SHORT,
        },
    ]);

    assert_eq!(dispatcher.reconcile_neighbors(), vec![DeviceId::Scarecrow]);
    // 2回目は登録済みなので何もしない
    assert!(dispatcher.reconcile_neighbors().is_empty());
    assert_eq!(dispatcher.registry().bound_targets().len(), 1);
    assert_eq!(
        dispatcher.drain_outbox(),
        vec![LinkFrame::DeviceJoined(DeviceId::Scarecrow)]
    );
}

#[test]
fn test_split_frame_is_recovered_across_reads() {
    let (dispatcher, _, _) = coordinator();
    let mut port = MockLinkPort::new();
    let mut receiver = FrameReceiver::new(true);

    port.queue_read_data(vec![0xAA, 0x10]);
    port.queue_read_data(vec![0x55]);

    assert_eq!(dispatcher.poll_link(&mut port, &mut receiver, 100).unwrap(), 0);
    assert_eq!(receiver.pending_len(), 2);
    assert_eq!(dispatcher.poll_link(&mut port, &mut receiver, 100).unwrap(), 1);
    assert_eq!(port.get_sent_data(), vec![vec![0xAA, 0x11, 0x00, 0x00, 0x55]]);
}

#[test]
fn test_leave_then_trigger_skips_prop() {
    let (dispatcher, radio, _) = coordinator();
    dispatcher.handle_signal(announce(SCARECROW_IEEE, SCARECROW_SHORT));
    dispatcher.handle_signal(ZigbeeSignal::DeviceLeave {
        ieee: SCARECROW_IEEE,
        short: SCARECROW_SHORT,
    });

    let report = dispatcher.trigger(TriggerTarget::Scarecrow);
    assert!(report.sent.is_empty());
    assert_eq!(report.skipped, vec![DeviceId::Scarecrow]);
    assert!(radio.toggles().is_empty());
    assert_eq!(
        dispatcher.drain_outbox(),
        vec![
            LinkFrame::DeviceJoined(DeviceId::Scarecrow),
            LinkFrame::DeviceLeft(DeviceId::Scarecrow)
        ]
    );
}
