/// Coordinator Command Dispatcher
///
/// コーディネータのイベント処理の中心です。以下の3系統のイベントを
/// Registry の更新と2つの出力（ゲートウェイ宛てリンクフレーム、プロップ宛て
/// Zigbee ユニキャスト）に振り分けます。
///
/// - シリアルリンクからのフレーム (`handle_frame`)
/// - Zigbee スタックのシグナル (`handle_signal`) と属性書き込み (`handle_attribute_write`)
/// - 近隣テーブルの定期照合 (`reconcile_neighbors`)
///
/// Registry の更新は必ず対応する送信より先に行います。ゲートウェイ宛ての
/// フレームは送信キューに積み、シリアルタスクが `flush_outbox` で書き出します。

use crate::clock::WallClock;
use crate::config::CoordinatorConfig;
use crate::device::{format_ieee, AllowList, DeviceId};
use crate::display::{lines, StatusDisplay};
use crate::link::{LinkFrame, LinkPort, LinkResult, TriggerTarget};
use crate::registry::{Registration, Registry, RegistryError};
use crate::zigbee::{
    attribute, cluster, AttributeValue, AttributeWrite, CommissioningMode, RadioEvent,
    ZigbeeRadio, ZigbeeSignal, TRIGGER_OTHER_PROP,
};
use heapless::Deque;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// 送信キューの最大サイズ
const OUTBOX_SIZE: usize = 16;

/// コーディネータのライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// スタック初期化中
    Startup,
    /// ネットワーク形成中
    Forming,
    /// 参加受付の開始待ち
    Steering,
    /// 参加受付中
    Running,
}

/// トリガー処理の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    /// Zigbee コマンドを送ったデバイス
    pub sent: Vec<DeviceId>,
    /// 未参加などで送れなかったデバイス
    pub skipped: Vec<DeviceId>,
}

pub struct Dispatcher<R: ZigbeeRadio, C: WallClock> {
    registry: Arc<Registry>,
    allow_list: AllowList,
    radio: R,
    clock: C,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    formation_retries: AtomicU32,
    /// ゲートウェイから時刻を受け取ったか
    clock_synced: AtomicBool,
    outbox: Mutex<Deque<LinkFrame, OUTBOX_SIZE>>,
    display: Mutex<Option<Box<dyn StatusDisplay>>>,
}

impl<R: ZigbeeRadio, C: WallClock> Dispatcher<R, C> {
    pub fn new(
        registry: Arc<Registry>,
        allow_list: AllowList,
        radio: R,
        clock: C,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            allow_list,
            radio,
            clock,
            config,
            state: Mutex::new(CoordinatorState::Startup),
            formation_retries: AtomicU32::new(0),
            clock_synced: AtomicBool::new(false),
            outbox: Mutex::new(Deque::new()),
            display: Mutex::new(None),
        }
    }

    /// 表示器をつなぐ（なければ表示しない）
    pub fn set_display(&self, display: Box<dyn StatusDisplay>) {
        *self.display.lock().unwrap_or_else(|e| e.into_inner()) = Some(display);
    }

    fn show(&self, (line1, line2): (&str, &str)) {
        if let Some(display) = self.display.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            display.show(line1, line2);
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn formation_retries(&self) -> u32 {
        self.formation_retries.load(Ordering::Relaxed)
    }

    pub fn is_clock_synced(&self) -> bool {
        self.clock_synced.load(Ordering::Acquire)
    }

    fn set_state(&self, next: CoordinatorState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            info!("Coordinator state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Deque<LinkFrame, OUTBOX_SIZE>> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(&self, frame: LinkFrame) {
        let mut outbox = self.outbox();
        if outbox.len() >= self.config.outbox_capacity.min(OUTBOX_SIZE) {
            // 古いものから捨てる
            if let Some(dropped) = outbox.pop_front() {
                warn!("Link outbox full, dropping {:?}", dropped);
            }
        }
        if outbox.push_back(frame).is_err() {
            error!("Link outbox rejected {:?}", frame);
        } else {
            debug!("Queued {:?} for gateway (queue size: {})", frame, outbox.len());
        }
    }

    /// 送信キューの中身を取り出す
    pub fn drain_outbox(&self) -> Vec<LinkFrame> {
        let mut outbox = self.outbox();
        let mut frames = Vec::with_capacity(outbox.len());
        while let Some(frame) = outbox.pop_front() {
            frames.push(frame);
        }
        frames
    }

    /// 送信キューをシリアルリンクに書き出す
    ///
    /// 書き込みに失敗したフレームは捨てます（fire-and-forget）。
    pub fn flush_outbox<P: LinkPort>(&self, port: &mut P) -> usize {
        let mut sent = 0;
        for frame in self.drain_outbox() {
            match port.send_frame(&frame, 100) {
                Ok(()) => sent += 1,
                Err(e) => error!("Failed to send {:?} to gateway: {}", frame, e),
            }
        }
        sent
    }

    // ------------------------------------------------------------------
    // シリアルリンク
    // ------------------------------------------------------------------

    /// ゲートウェイからのフレームを処理
    pub fn handle_frame(&self, frame: LinkFrame) {
        match frame {
            LinkFrame::Trigger(target) => {
                info!("Gateway requested trigger {:?}", target);
                self.trigger(target);
            }
            LinkFrame::StatusRequest => {
                let flags = self.registry.status_flags(self.clock.now_unix());
                debug!("Status request -> flags 0b{:06b}", flags.bits());
                self.enqueue(LinkFrame::StatusResponse(flags));
            }
            LinkFrame::TimeSync(unix) => self.apply_time_sync(unix),
            other => warn!("Ignoring unexpected frame from gateway: {:?}", other),
        }
    }

    /// シリアルリンクを1回ポーリングし、受信フレームを処理して送信キューを書き出す
    pub fn poll_link<P: LinkPort>(
        &self,
        port: &mut P,
        receiver: &mut crate::link::FrameReceiver,
        timeout_ms: u32,
    ) -> LinkResult<usize> {
        let polled = receiver.poll(port, timeout_ms);
        if let Ok(frames) = &polled {
            for frame in frames {
                self.handle_frame(*frame);
            }
        }
        // 受信に失敗しても参加通知などは書き出す
        self.flush_outbox(port);
        polled.map(|frames| frames.len())
    }

    /// 対象プロップへトリガーを送る
    ///
    /// 参加中のプロップには Zigbee トグルを送り、クールダウン外なら記録します。
    /// クールダウン中でもコマンド自体は送ります。未参加のプロップはログのみ。
    pub fn trigger(&self, target: TriggerTarget) -> TriggerReport {
        let now = self.clock.now_unix();
        let mut report = TriggerReport::default();

        for &id in target.devices() {
            let Some(ticket) = self.registry.begin_trigger(id, now) else {
                warn!("{} not bound, skipping trigger", id);
                report.skipped.push(id);
                continue;
            };

            if !report.sent.is_empty() && self.config.trigger_gap_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.trigger_gap_ms));
            }

            match self.radio.send_toggle(ticket.network_address, ticket.endpoint) {
                Ok(()) => {
                    info!(
                        "Triggered {} (short=0x{:04X}, ep={}{})",
                        id,
                        ticket.network_address,
                        ticket.endpoint,
                        if ticket.cooldown_started { "" } else { ", in cooldown" }
                    );
                    self.show(lines::triggered(id));
                    report.sent.push(id);
                }
                Err(e) => {
                    error!("Failed to send toggle to {}: {}", id, e);
                    report.skipped.push(id);
                }
            }
        }

        report
    }

    /// 時刻同期フレームの処理
    ///
    /// 自分の時計を合わせてから、参加中の全プロップに同じ時刻を配信します。
    fn apply_time_sync(&self, unix: u32) {
        if let Err(e) = self.clock.set_unix(unix as u64) {
            warn!("Could not set local wall clock: {}", e);
        }
        self.clock_synced.store(true, Ordering::Release);
        info!("Wall clock synced from gateway: {}", unix);

        for target in self.registry.bound_targets() {
            self.push_time(target.id, unix);
        }
    }

    /// 1台に時刻を配信（クールダウンとは無関係）
    fn push_time(&self, id: DeviceId, unix: u32) -> bool {
        let Some(target) = self.registry.target(id) else {
            debug!("{} not bound, no time push", id);
            return false;
        };

        match self
            .radio
            .write_time(target.network_address, target.endpoint, unix)
        {
            Ok(()) => {
                self.registry.mark_time_synced(id, unix as u64);
                info!("Pushed time {} to {}", unix, id);
                true
            }
            Err(e) => {
                warn!("Time push to {} failed: {}", id, e);
                false
            }
        }
    }

    /// 現在時刻を配信（時計未同期なら何もしない）
    fn push_current_time(&self, id: DeviceId) -> bool {
        if !self.is_clock_synced() {
            info!("Wall clock not synced yet, {} stays unsynced until the next time sync", id);
            return false;
        }
        let now = self.clock.now_unix();
        match u32::try_from(now) {
            Ok(unix) => self.push_time(id, unix),
            Err(_) => {
                error!("Wall clock {} does not fit the time sync attribute", now);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Zigbee
    // ------------------------------------------------------------------

    pub fn handle_radio_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Signal(signal) => self.handle_signal(signal),
            RadioEvent::AttributeWrite(write) => {
                self.handle_attribute_write(write);
            }
        }
    }

    /// Zigbee シグナルによる状態遷移
    pub fn handle_signal(&self, signal: ZigbeeSignal) {
        match signal {
            ZigbeeSignal::SkipStartup => {
                info!("Zigbee stack initialized");
                self.set_state(CoordinatorState::Startup);
                self.show(lines::ZIGBEE);
                self.commission(CommissioningMode::Initialization);
            }
            ZigbeeSignal::DeviceFirstStart { ok } | ZigbeeSignal::DeviceReboot { ok } => {
                if ok {
                    info!("Coordinator started, forming network on channel {}", self.config.channel);
                    self.set_state(CoordinatorState::Forming);
                    self.commission(CommissioningMode::NetworkFormation);
                } else {
                    error!("Failed to initialize Zigbee stack");
                }
            }
            ZigbeeSignal::Formation { ok } => {
                if ok {
                    info!("Formed network successfully, opening for joining");
                    self.set_state(CoordinatorState::Steering);
                    self.commission(CommissioningMode::NetworkSteering);
                } else {
                    let retries = self.formation_retries.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "Network formation failed, retrying in {} ms (attempt {})",
                        self.config.formation_retry_ms, retries
                    );
                    self.set_state(CoordinatorState::Forming);
                    self.schedule(CommissioningMode::NetworkFormation, self.config.formation_retry_ms);
                }
            }
            ZigbeeSignal::Steering { ok } => {
                if ok {
                    info!("Network steering started - devices can now join");
                    self.set_state(CoordinatorState::Running);
                    self.show(lines::READY);
                } else {
                    warn!(
                        "Network steering failed, retrying in {} ms",
                        self.config.steering_retry_ms
                    );
                    self.schedule(CommissioningMode::NetworkSteering, self.config.steering_retry_ms);
                }
            }
            ZigbeeSignal::DeviceAnnounce { ieee, short } => {
                info!("Device announce: ieee={} short=0x{:04X}", format_ieee(ieee), short);
                self.on_device_joined(ieee, short);
            }
            ZigbeeSignal::DeviceLeave { ieee, short } => {
                info!("Device leave: ieee={} short=0x{:04X}", format_ieee(ieee), short);
                self.on_device_left(ieee);
            }
            ZigbeeSignal::Other { code, ok } => {
                debug!("Unhandled ZDO signal 0x{:X} (ok={})", code, ok);
            }
        }
    }

    fn commission(&self, mode: CommissioningMode) {
        if let Err(e) = self.radio.start_commissioning(mode) {
            error!("Failed to start {:?}: {}", mode, e);
        }
    }

    fn schedule(&self, mode: CommissioningMode, delay_ms: u32) {
        if let Err(e) = self.radio.schedule_commissioning(mode, delay_ms) {
            error!("Failed to schedule {:?}: {}", mode, e);
        }
    }

    /// 参加の処理: Registry 更新 → 時刻配信 → 参加通知
    ///
    /// 参加済みのプロップの再参加では時刻だけを配信し直します。
    /// 新たにバインドされた場合のみデバイスを返します。
    pub fn on_device_joined(&self, ieee: u64, short: u16) -> Option<DeviceId> {
        match self.registry.register_or_update(ieee, short) {
            Ok(Registration::NewlyBound { id, .. }) => {
                self.push_current_time(id);
                self.enqueue(LinkFrame::DeviceJoined(id));
                self.show(lines::joined(id));
                Some(id)
            }
            Ok(Registration::AlreadyBound { id, .. }) => {
                // 電源を入れ直したプロップは離脱なしで再参加してくる
                info!("{} rejoined, pushing time again", id);
                self.push_current_time(id);
                None
            }
            Err(RegistryError::UnknownIdentity(_)) => {
                warn!("Ignoring unknown radio {} (0x{:04X})", format_ieee(ieee), short);
                None
            }
            Err(e) => {
                warn!("Join not registered: {}", e);
                None
            }
        }
    }

    /// 離脱の処理: Registry 更新 → 離脱通知
    pub fn on_device_left(&self, ieee: u64) -> Option<DeviceId> {
        match self.registry.unbind(ieee) {
            Ok(Some(id)) => {
                self.enqueue(LinkFrame::DeviceLeft(id));
                self.show(lines::left(id));
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Leave ignored: {}", e);
                None
            }
        }
    }

    /// 近隣テーブルの照合
    ///
    /// 参加シグナルを取りこぼした場合に備え、許可リストにあるのに未登録の
    /// プロップを登録します。許可リストにない無線機はログのみ。
    /// 新たに登録したデバイスを返します。
    pub fn reconcile_neighbors(&self) -> Vec<DeviceId> {
        let neighbors = match self.radio.neighbors() {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("Neighbor table scan failed: {}", e);
                return Vec::new();
            }
        };

        debug!("Neighbor scan: {} entries", neighbors.len());
        let mut registered = Vec::new();
        for neighbor in neighbors {
            match self.allow_list.lookup(neighbor.ieee) {
                Some(id) => {
                    if self.registry.is_bound(neighbor.ieee) {
                        continue;
                    }
                    info!("Neighbor scan found unregistered {} at 0x{:04X}", id, neighbor.short);
                    if let Some(id) = self.on_device_joined(neighbor.ieee, neighbor.short) {
                        registered.push(id);
                    }
                }
                None => info!(
                    "Unknown radio in neighbor table: {} (0x{:04X})",
                    format_ieee(neighbor.ieee),
                    neighbor.short
                ),
            }
        }
        registered
    }

    /// プロップからの属性書き込み
    ///
    /// かかしのトリガー要求 (0xFC01/0x0000 = 1) は、ゲートウェイからのトリガーと
    /// 同じ経路でもう一方のプロップを鳴らします。
    pub fn handle_attribute_write(&self, write: AttributeWrite) -> Option<TriggerReport> {
        if write.cluster != cluster::TRIGGER_REQUEST
            || write.attribute != attribute::TRIGGER_REQUEST_VALUE
        {
            debug!(
                "Ignoring attribute write cluster=0x{:04X} attr=0x{:04X}",
                write.cluster, write.attribute
            );
            return None;
        }

        if write.value != AttributeValue::U8(TRIGGER_OTHER_PROP) {
            debug!("Trigger request with value {:?} ignored", write.value);
            return None;
        }

        // 送信元が分からない場合はトリガー要求を持つ唯一のプロップ（かかし）とみなす
        let requester = write
            .source_short
            .and_then(|short| self.registry.device_for_address(short))
            .unwrap_or(DeviceId::Scarecrow);
        let target = requester.other();
        info!("{} requested trigger of {}", requester, target);
        Some(self.trigger(TriggerTarget::single(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::{RIP_TOMBSTONE_IEEE, SCARECROW_IEEE};
    use crate::display::MockDisplay;
    use crate::zigbee::mock::{MockRadio, RadioCommand};

    const NOW: u64 = 1_761_900_000;

    fn dispatcher() -> Dispatcher<MockRadio, ManualClock> {
        let allow_list = AllowList::default();
        let registry = Arc::new(Registry::new(&allow_list));
        let config = CoordinatorConfig {
            trigger_gap_ms: 0,
            ..CoordinatorConfig::default()
        };
        Dispatcher::new(registry, allow_list, MockRadio::new(), ManualClock::new(NOW), config)
    }

    #[test]
    fn test_startup_sequence() {
        let dispatcher = dispatcher();
        dispatcher.handle_signal(ZigbeeSignal::SkipStartup);
        dispatcher.handle_signal(ZigbeeSignal::DeviceFirstStart { ok: true });
        assert_eq!(dispatcher.state(), CoordinatorState::Forming);
        dispatcher.handle_signal(ZigbeeSignal::Formation { ok: true });
        assert_eq!(dispatcher.state(), CoordinatorState::Steering);
        dispatcher.handle_signal(ZigbeeSignal::Steering { ok: true });
        assert_eq!(dispatcher.state(), CoordinatorState::Running);

        assert_eq!(
            dispatcher.radio().get_commands(),
            vec![
                RadioCommand::StartCommissioning(CommissioningMode::Initialization),
                RadioCommand::StartCommissioning(CommissioningMode::NetworkFormation),
                RadioCommand::StartCommissioning(CommissioningMode::NetworkSteering),
            ]
        );
    }

    #[test]
    fn test_formation_failure_retries_after_one_second() {
        let dispatcher = dispatcher();
        dispatcher.handle_signal(ZigbeeSignal::Formation { ok: false });
        dispatcher.handle_signal(ZigbeeSignal::Formation { ok: false });
        assert_eq!(dispatcher.formation_retries(), 2);
        assert_eq!(dispatcher.state(), CoordinatorState::Forming);
        assert_eq!(
            dispatcher.radio().get_commands()[0],
            RadioCommand::ScheduleCommissioning {
                mode: CommissioningMode::NetworkFormation,
                delay_ms: 1000
            }
        );
    }

    #[test]
    fn test_join_before_clock_sync_stays_unsynced() {
        let dispatcher = dispatcher();
        dispatcher.handle_signal(ZigbeeSignal::DeviceAnnounce {
            ieee: RIP_TOMBSTONE_IEEE,
            short: 0x1001,
        });
        let record = dispatcher.registry().record(DeviceId::RipTombstone).unwrap();
        assert!(record.is_bound);
        assert!(!record.time_synced);
        assert!(dispatcher.radio().time_writes().is_empty());
        assert_eq!(
            dispatcher.drain_outbox(),
            vec![LinkFrame::DeviceJoined(DeviceId::RipTombstone)]
        );

        // 時刻同期が届いた時点で参加中のプロップへ配信される
        dispatcher.handle_frame(LinkFrame::TimeSync(NOW as u32));
        assert_eq!(dispatcher.radio().time_writes(), vec![(0x1001, NOW as u32)]);
        assert!(dispatcher.registry().record(DeviceId::RipTombstone).unwrap().time_synced);
    }

    #[test]
    fn test_leave_emits_single_notification() {
        let dispatcher = dispatcher();
        dispatcher.on_device_joined(SCARECROW_IEEE, 0x2002);
        dispatcher.drain_outbox();

        dispatcher.handle_signal(ZigbeeSignal::DeviceLeave {
            ieee: SCARECROW_IEEE,
            short: 0x2002,
        });
        dispatcher.handle_signal(ZigbeeSignal::DeviceLeave {
            ieee: SCARECROW_IEEE,
            short: 0x2002,
        });
        assert_eq!(
            dispatcher.drain_outbox(),
            vec![LinkFrame::DeviceLeft(DeviceId::Scarecrow)]
        );
    }

    #[test]
    fn test_unknown_radio_is_never_registered() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.on_device_joined(0x0011_2233_4455_6677, 0x3003), None);
        assert!(dispatcher.drain_outbox().is_empty());
        assert!(dispatcher.registry().bound_targets().is_empty());
    }

    #[test]
    fn test_trigger_during_cooldown_still_sends_command() {
        let dispatcher = dispatcher();
        dispatcher.on_device_joined(RIP_TOMBSTONE_IEEE, 0x1001);

        dispatcher.handle_frame(LinkFrame::Trigger(TriggerTarget::Rip));
        dispatcher.handle_frame(LinkFrame::Trigger(TriggerTarget::Rip));
        assert_eq!(dispatcher.radio().toggles(), vec![(0x1001, 1), (0x1001, 1)]);
        assert_eq!(
            dispatcher.registry().record(DeviceId::RipTombstone).unwrap().last_trigger,
            NOW
        );
    }

    #[test]
    fn test_toggle_failure_is_reported_as_skipped() {
        let dispatcher = dispatcher();
        dispatcher.on_device_joined(RIP_TOMBSTONE_IEEE, 0x1001);
        dispatcher.radio().set_command_error(true);
        let report = dispatcher.trigger(TriggerTarget::Rip);
        assert!(report.sent.is_empty());
        assert_eq!(report.skipped, vec![DeviceId::RipTombstone]);
    }

    #[test]
    fn test_scarecrow_trigger_request_triggers_tombstone() {
        let dispatcher = dispatcher();
        dispatcher.on_device_joined(RIP_TOMBSTONE_IEEE, 0x1001);
        dispatcher.on_device_joined(SCARECROW_IEEE, 0x2002);

        let report = dispatcher
            .handle_attribute_write(AttributeWrite {
                source_short: Some(0x2002),
                cluster: cluster::TRIGGER_REQUEST,
                attribute: attribute::TRIGGER_REQUEST_VALUE,
                value: AttributeValue::U8(TRIGGER_OTHER_PROP),
            })
            .unwrap();
        assert_eq!(report.sent, vec![DeviceId::RipTombstone]);
        assert_eq!(dispatcher.radio().toggles(), vec![(0x1001, 1)]);
        assert!(dispatcher
            .registry()
            .record(DeviceId::RipTombstone)
            .unwrap()
            .is_in_cooldown(NOW));
    }

    #[test]
    fn test_trigger_request_with_other_value_is_ignored() {
        let dispatcher = dispatcher();
        dispatcher.on_device_joined(RIP_TOMBSTONE_IEEE, 0x1001);
        let result = dispatcher.handle_attribute_write(AttributeWrite {
            source_short: None,
            cluster: cluster::TRIGGER_REQUEST,
            attribute: attribute::TRIGGER_REQUEST_VALUE,
            value: AttributeValue::U8(0),
        });
        assert_eq!(result, None);
        assert!(dispatcher.radio().toggles().is_empty());
    }

    #[test]
    fn test_display_follows_join_and_trigger() {
        let dispatcher = dispatcher();
        let display = MockDisplay::new();
        dispatcher.set_display(Box::new(display.clone()));

        dispatcher.on_device_joined(SCARECROW_IEEE, 0x2002);
        assert_eq!(display.last(), Some(("SCARECROW".to_string(), "JOINED".to_string())));
        dispatcher.trigger(TriggerTarget::Both);
        assert_eq!(display.last(), Some(("HALLOWEEN!".to_string(), String::new())));
    }

    #[test]
    fn test_outbox_drops_oldest_when_full() {
        let dispatcher = dispatcher();
        for _ in 0..(OUTBOX_SIZE + 3) {
            dispatcher.handle_frame(LinkFrame::StatusRequest);
        }
        assert_eq!(dispatcher.drain_outbox().len(), OUTBOX_SIZE);
    }
}
