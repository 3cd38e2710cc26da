/// Gateway-Side Controller
///
/// WiFi/HTTP 側ノードのロジックです。PIR センサーと HTTP からのトリガーを
/// リンクフレームに変換し、コーディネータからのステータスフレームを
/// 画面・API 用のスナップショットに反映します。
///
/// スマートトリガー（接続中のプロップだけを鳴らす）の判断は最後に受け取った
/// ステータスに基づくため、最大でポーリング間隔（3秒）分古い可能性があります。

pub mod api;
pub mod events;
pub mod http;
pub mod timers;

pub use events::{Event, EventKind, EventLog, MAX_EVENTS};
pub use http::{route, HttpMethod, Response, Route};
pub use timers::{Debouncer, Ticker};

use crate::clock::WallClock;
use crate::config::{GatewayConfig, LinkConfig};
use crate::device::DeviceId;
use crate::display::{lines, StatusDisplay};
use crate::link::{
    DeviceStatus, FrameReceiver, LinkFrame, LinkPort, PortError, StatusFlags, TriggerTarget,
};
use crate::time_sync;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// ゲートウェイのエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// 起動時に時刻が得られなかった
    #[error("wall clock unavailable after waiting {waited_secs} s for NTP")]
    TimeUnavailable { waited_secs: u64 },
    #[error("serial link error: {0}")]
    Link(#[from] PortError),
    #[error("wifi error: {0}")]
    Wifi(String),
    #[error("http server error: {0}")]
    Http(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// ゲートウェイ側で把握しているプロップの状態
#[derive(Debug, Clone)]
struct GatewayState {
    flags: StatusFlags,
    /// 最後にステータスを受け取った時刻
    last_status_at: Option<u64>,
    pir_motion: bool,
    idle_lines: (String, String),
    /// 未同期のプロップ向けに最後に時刻を送った時刻
    last_unsynced_push_at: Option<u64>,
}

/// API・画面用のスナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySnapshot {
    pub now: u64,
    pub time_synced: bool,
    pub pir_motion: bool,
    pub devices: Vec<(DeviceId, DeviceStatus)>,
    /// 最後のステータスからの経過秒数（未受信なら None）
    pub status_age_secs: Option<u64>,
    /// 新しい順
    pub events: Vec<Event>,
}

impl GatewaySnapshot {
    pub fn device(&self, id: DeviceId) -> DeviceStatus {
        self.devices
            .iter()
            .find(|(device, _)| *device == id)
            .map(|(_, status)| *status)
            .unwrap_or_default()
    }
}

/// ポーリングタスクの定期処理
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimers {
    pub status: Ticker,
    pub time_resync: Ticker,
    pub display_refresh: Ticker,
}

impl GatewayTimers {
    /// `start_ms` は起動処理が終わった時点の経過ミリ秒
    pub fn new(config: &GatewayConfig, start_ms: u64) -> Self {
        Self {
            status: Ticker::new(
                start_ms + config.first_status_delay_ms,
                config.status_poll_interval_ms,
            ),
            time_resync: Ticker::new(
                start_ms + config.time_resync_interval_ms,
                config.time_resync_interval_ms,
            ),
            display_refresh: Ticker::new(
                start_ms + config.display_refresh_interval_ms,
                config.display_refresh_interval_ms,
            ),
        }
    }
}

/// 検知したプロップの接続状況から鳴らす対象を選ぶ
pub fn smart_target(rip: &DeviceStatus, scarecrow: &DeviceStatus) -> Option<TriggerTarget> {
    match (rip.connected, scarecrow.connected) {
        (true, true) => Some(TriggerTarget::Both),
        (false, true) => Some(TriggerTarget::Scarecrow),
        (true, false) => Some(TriggerTarget::Rip),
        (false, false) => None,
    }
}

pub struct GatewayController<P: LinkPort, C: WallClock, D: StatusDisplay> {
    port: Mutex<P>,
    receiver: Mutex<FrameReceiver>,
    clock: C,
    display: Mutex<D>,
    config: GatewayConfig,
    link: LinkConfig,
    state: Mutex<GatewayState>,
    motion_filter: Mutex<Debouncer>,
    events: Mutex<EventLog>,
    time_synced: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<P: LinkPort, C: WallClock, D: StatusDisplay> GatewayController<P, C, D> {
    pub fn new(port: P, clock: C, display: D, config: GatewayConfig, link: LinkConfig) -> Self {
        Self {
            port: Mutex::new(port),
            receiver: Mutex::new(FrameReceiver::new(link.carry_partial_frames)),
            clock,
            display: Mutex::new(display),
            config,
            link,
            state: Mutex::new(GatewayState {
                flags: StatusFlags::default(),
                last_status_at: None,
                pir_motion: false,
                idle_lines: (String::new(), String::new()),
                last_unsynced_push_at: None,
            }),
            motion_filter: Mutex::new(Debouncer::new(config.motion_debounce_ms)),
            events: Mutex::new(EventLog::new()),
            time_synced: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 起動メッセージなどを表示
    pub fn show(&self, line1: &str, line2: &str) {
        lock(&self.display).show(line1, line2);
    }

    /// 待機表示（SSID / IP アドレス）を設定して表示
    pub fn set_idle_lines(&self, line1: &str, line2: &str) {
        lock(&self.state).idle_lines = (line1.to_string(), line2.to_string());
        self.show(line1, line2);
    }

    fn show_idle(&self) {
        let (line1, line2) = lock(&self.state).idle_lines.clone();
        self.show(&line1, &line2);
    }

    /// NTP 同期の完了を記録
    pub fn mark_time_synced(&self) {
        self.time_synced.store(true, Ordering::Release);
    }

    pub fn is_time_synced(&self) -> bool {
        self.time_synced.load(Ordering::Acquire)
    }

    fn record(&self, kind: EventKind, device: Option<DeviceId>) {
        let event = Event {
            timestamp: self.clock.now_unix(),
            kind,
            device,
        };
        lock(&self.events).push(event);
    }

    fn send(&self, frame: LinkFrame) -> GatewayResult<()> {
        let mut port = lock(&self.port);
        port.send_frame(&frame, self.link.write_timeout_ms)?;
        debug!("Sent {:?} to coordinator", frame);
        Ok(())
    }

    /// トリガーを送る（手動・自動共通）
    pub fn trigger(&self, target: TriggerTarget) -> GatewayResult<()> {
        info!("Triggering {:?} via serial link", target);
        self.send(LinkFrame::Trigger(target))?;
        self.record(EventKind::for_trigger(target), None);
        Ok(())
    }

    /// ステータス要求 (0x10)
    pub fn request_status(&self) -> GatewayResult<()> {
        self.send(LinkFrame::StatusRequest)
    }

    /// 時刻同期 (0x20) を送る
    ///
    /// NTP 未同期の間は送らずに false を返します。
    pub fn push_time(&self) -> GatewayResult<bool> {
        if !self.is_time_synced() {
            warn!("Cannot send time sync - time not synchronized yet");
            return Ok(false);
        }
        let now = self.clock.now_unix();
        let Some(frame) = time_sync::time_sync_frame(now) else {
            return Ok(false);
        };
        self.send(frame)?;
        info!(
            "Sent time sync {} ({})",
            now,
            time_sync::format_local(now, &self.config.timezone)
        );
        Ok(true)
    }

    /// PIR センサーの読み取り値（`now_ms` は起動からのミリ秒）
    ///
    /// レベルが `motion_debounce_ms` 続いて確定したときだけエッジとして扱います。
    /// 立ち上がりでは画面表示と自動トリガー、立ち下がりでは表示を戻すだけです。
    /// 送ったトリガーを返します。
    pub fn on_motion(&self, raw: bool, now_ms: u64) -> GatewayResult<Option<TriggerTarget>> {
        let settled = lock(&self.motion_filter).update(raw, now_ms);
        match settled {
            Some(motion) => self.apply_motion(motion),
            None => Ok(None),
        }
    }

    fn apply_motion(&self, motion: bool) -> GatewayResult<Option<TriggerTarget>> {
        let (rip, scarecrow) = {
            let mut state = lock(&self.state);
            if state.pir_motion == motion {
                return Ok(None);
            }
            state.pir_motion = motion;
            (
                state.flags.device(DeviceId::RipTombstone),
                state.flags.device(DeviceId::Scarecrow),
            )
        };

        if !motion {
            info!("Motion stopped");
            self.record(EventKind::MotionStopped, None);
            self.show_idle();
            return Ok(None);
        }

        info!("Motion detected!");
        self.record(EventKind::MotionDetected, None);
        self.show(lines::MOTION.0, lines::MOTION.1);

        match smart_target(&rip, &scarecrow) {
            Some(target) => {
                self.trigger(target)?;
                Ok(Some(target))
            }
            None => {
                warn!("Motion detected but no devices connected!");
                Ok(None)
            }
        }
    }

    /// 接続中なのに未同期のプロップがあれば時刻を送り直す
    ///
    /// コーディネータの時計が合う前に参加したプロップは、次の時刻同期まで
    /// 未同期のままになるため。送信は `unsynced_push_interval_secs` に1回まで。
    fn push_time_to_unsynced(&self, flags: StatusFlags, now: u64) {
        let unsynced: Vec<DeviceId> = DeviceId::ALL
            .into_iter()
            .filter(|&id| {
                let status = flags.device(id);
                status.connected && !status.time_synced
            })
            .collect();
        if unsynced.is_empty() || !self.is_time_synced() {
            return;
        }
        {
            let mut state = lock(&self.state);
            if let Some(at) = state.last_unsynced_push_at {
                if now.saturating_sub(at) < self.config.unsynced_push_interval_secs {
                    return;
                }
            }
            state.last_unsynced_push_at = Some(now);
        }
        info!("Connected but unsynced: {:?}, resending time", unsynced);
        if let Err(e) = self.push_time() {
            warn!("Time sync for unsynced devices failed: {}", e);
        }
    }

    /// コーディネータからのフレーム
    pub fn handle_frame(&self, frame: LinkFrame) {
        match frame {
            LinkFrame::StatusResponse(flags) => {
                let now = self.clock.now_unix();
                {
                    let mut state = lock(&self.state);
                    state.flags = flags;
                    state.last_status_at = Some(now);
                }
                let describe = |id: DeviceId| {
                    let s = flags.device(id);
                    format!(
                        "{}/{}/{}",
                        if s.connected { "connected" } else { "absent" },
                        if s.time_synced { "synced" } else { "unsynced" },
                        if s.in_cooldown { "COOL" } else { "RDY" }
                    )
                };
                debug!(
                    "Device status updated: RIP[{}] Scarecrow[{}]",
                    describe(DeviceId::RipTombstone),
                    describe(DeviceId::Scarecrow)
                );
                self.push_time_to_unsynced(flags, now);
            }
            LinkFrame::DeviceJoined(id) => {
                info!("Device joined: {}", id.name());
                self.record(EventKind::DeviceJoined, Some(id));
            }
            LinkFrame::DeviceLeft(id) => {
                info!("Device left: {}", id.name());
                self.record(EventKind::DeviceLeft, Some(id));
            }
            other => warn!("Ignoring unexpected frame from coordinator: {:?}", other),
        }
    }

    /// シリアルリンクを1回読む（最大 read_timeout_ms 待つ）
    pub fn poll_link(&self) -> GatewayResult<usize> {
        let frames = {
            let mut port = lock(&self.port);
            let mut receiver = lock(&self.receiver);
            receiver.poll(&mut *port, self.link.read_timeout_ms)?
        };
        let received = frames.len();
        for frame in frames {
            self.handle_frame(frame);
        }
        Ok(received)
    }

    /// 定期処理（ステータス要求・時刻再配信・待機表示の更新）
    pub fn run_timers(&self, timers: &mut GatewayTimers, now_ms: u64) -> GatewayResult<()> {
        if timers.status.due(now_ms) {
            self.request_status()?;
        }
        if timers.time_resync.due(now_ms) {
            info!("Periodic time sync with coordinator");
            self.push_time()?;
        }
        if timers.display_refresh.due(now_ms) && !lock(&self.state).pir_motion {
            self.show_idle();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        let now = self.clock.now_unix();
        let (flags, last_status_at, pir_motion) = {
            let state = lock(&self.state);
            (state.flags, state.last_status_at, state.pir_motion)
        };
        let events = lock(&self.events).recent(self.config.api_event_limit);

        GatewaySnapshot {
            now,
            time_synced: self.is_time_synced(),
            pir_motion,
            devices: DeviceId::ALL
                .iter()
                .map(|&id| (id, flags.device(id)))
                .collect(),
            status_age_secs: last_status_at.map(|at| now.saturating_sub(at)),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::display::MockDisplay;
    use crate::link::mock::MockLinkPort;

    const NOW: u64 = 1_761_970_500;

    fn controller() -> (
        GatewayController<MockLinkPort, ManualClock, MockDisplay>,
        MockLinkPort,
        ManualClock,
        MockDisplay,
    ) {
        let port = MockLinkPort::new();
        let clock = ManualClock::new(NOW);
        let display = MockDisplay::new();
        let controller = GatewayController::new(
            port.clone(),
            clock.clone(),
            display.clone(),
            GatewayConfig::default(),
            LinkConfig::default(),
        );
        (controller, port, clock, display)
    }

    #[test]
    fn test_smart_target_selection() {
        let on = DeviceStatus {
            connected: true,
            ..Default::default()
        };
        let off = DeviceStatus::default();
        assert_eq!(smart_target(&on, &on), Some(TriggerTarget::Both));
        assert_eq!(smart_target(&off, &on), Some(TriggerTarget::Scarecrow));
        assert_eq!(smart_target(&on, &off), Some(TriggerTarget::Rip));
        assert_eq!(smart_target(&off, &off), None);
    }

    #[test]
    fn test_status_response_updates_snapshot() {
        let (controller, _, clock, _) = controller();
        assert_eq!(controller.snapshot().status_age_secs, None);

        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_0101)));
        clock.advance(2);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status_age_secs, Some(2));
        let rip = snapshot.device(DeviceId::RipTombstone);
        assert!(rip.connected && rip.time_synced && !rip.in_cooldown);
        assert!(!snapshot.device(DeviceId::Scarecrow).connected);
    }

    #[test]
    fn test_motion_without_devices_sends_nothing() {
        let (controller, port, _, display) = controller();
        assert_eq!(controller.on_motion(true, 0).unwrap(), None);
        assert_eq!(controller.on_motion(true, 200).unwrap(), None);
        assert!(port.get_sent_data().is_empty());
        assert_eq!(
            display.last(),
            Some(("MOTION!".to_string(), "DETECTED".to_string()))
        );
    }

    #[test]
    fn test_falling_edge_restores_idle_lines() {
        let (controller, port, _, display) = controller();
        controller.set_idle_lines("haunted", "192.168.5.");
        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_1000)));

        assert_eq!(controller.on_motion(true, 0).unwrap(), None);
        assert_eq!(
            controller.on_motion(true, 200).unwrap(),
            Some(TriggerTarget::Scarecrow)
        );
        // 同じレベルの繰り返しはエッジではない
        assert_eq!(controller.on_motion(true, 300).unwrap(), None);
        assert_eq!(controller.on_motion(false, 400).unwrap(), None);
        assert_eq!(controller.on_motion(false, 600).unwrap(), None);

        assert_eq!(
            port.sent_frames(),
            vec![LinkFrame::Trigger(TriggerTarget::Scarecrow)]
        );
        assert_eq!(
            display.last(),
            Some(("haunted".to_string(), "192.168.5.".to_string()))
        );

        let kinds: Vec<&str> = controller
            .snapshot()
            .events
            .iter()
            .map(|e| e.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["motion_stopped", "trigger_halloween", "motion_detected"]);
    }

    #[test]
    fn test_motion_bounce_does_not_retrigger() {
        let (controller, port, _, _) = controller();
        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_1100)));

        for (now_ms, level) in [(0, true), (100, true), (200, true)] {
            controller.on_motion(level, now_ms).unwrap();
        }
        // センサーのグリッチ
        for (now_ms, level) in [(300, false), (400, true), (500, false), (600, true)] {
            assert_eq!(controller.on_motion(level, now_ms).unwrap(), None);
        }
        assert_eq!(port.sent_frames(), vec![LinkFrame::Trigger(TriggerTarget::Both)]);
        assert!(controller.snapshot().pir_motion);
    }

    #[test]
    fn test_short_pulse_never_triggers() {
        let (controller, port, _, display) = controller();
        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_1100)));

        assert_eq!(controller.on_motion(true, 0).unwrap(), None);
        assert_eq!(controller.on_motion(false, 100).unwrap(), None);
        assert_eq!(controller.on_motion(false, 1_000).unwrap(), None);
        assert!(port.get_sent_data().is_empty());
        assert!(controller.snapshot().events.is_empty());
        assert_eq!(display.last(), None);
    }

    #[test]
    fn test_unsynced_device_gets_time_again() {
        let (controller, port, clock, _) = controller();
        controller.mark_time_synced();
        // RIP: 接続中・未同期
        let unsynced = StatusFlags::from_bits(0b00_0100);

        controller.handle_frame(LinkFrame::StatusResponse(unsynced));
        assert_eq!(port.sent_frames(), vec![LinkFrame::TimeSync(NOW as u32)]);

        // 間隔内は送り直さない
        clock.advance(3);
        controller.handle_frame(LinkFrame::StatusResponse(unsynced));
        assert_eq!(port.sent_frames().len(), 1);

        clock.advance(30);
        controller.handle_frame(LinkFrame::StatusResponse(unsynced));
        assert_eq!(port.sent_frames().len(), 2);

        // 同期済みになれば何も送らない
        clock.advance(60);
        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_0101)));
        assert_eq!(port.sent_frames().len(), 2);
    }

    #[test]
    fn test_unsynced_device_waits_for_gateway_ntp() {
        let (controller, port, _, _) = controller();
        controller.handle_frame(LinkFrame::StatusResponse(StatusFlags::from_bits(0b00_1000)));
        assert!(port.get_sent_data().is_empty());
    }

    #[test]
    fn test_time_push_waits_for_ntp() {
        let (controller, port, _, _) = controller();
        assert!(!controller.push_time().unwrap());
        assert!(port.get_sent_data().is_empty());

        controller.mark_time_synced();
        assert!(controller.push_time().unwrap());
        let mut expected = vec![0xAA, 0x20];
        expected.extend_from_slice(&(NOW as u32).to_be_bytes());
        expected.push(0x55);
        assert_eq!(port.get_sent_data(), vec![expected]);
    }

    #[test]
    fn test_timers_request_status_every_three_seconds() {
        let (controller, port, _, _) = controller();
        let mut timers = GatewayTimers::new(controller.config(), 0);
        for now_ms in (0..=8_000).step_by(100) {
            controller.run_timers(&mut timers, now_ms).unwrap();
        }
        // 2s, 5s, 8s
        assert_eq!(port.sent_frames(), vec![LinkFrame::StatusRequest; 3]);
    }

    #[test]
    fn test_join_and_leave_are_logged_with_device() {
        let (controller, port, _, _) = controller();
        let mut chunk = LinkFrame::DeviceJoined(DeviceId::Scarecrow).encode();
        chunk.extend(LinkFrame::DeviceLeft(DeviceId::RipTombstone).encode());
        port.queue_read_data(chunk);
        assert_eq!(controller.poll_link().unwrap(), 2);

        let events = controller.snapshot().events;
        assert_eq!(events[0].kind, EventKind::DeviceLeft);
        assert_eq!(events[0].device, Some(DeviceId::RipTombstone));
        assert_eq!(events[1].device, Some(DeviceId::Scarecrow));
    }

    #[test]
    fn test_trigger_write_failure_is_reported() {
        let (controller, port, _, _) = controller();
        port.set_write_error(true);
        assert!(matches!(
            controller.trigger(TriggerTarget::Both),
            Err(GatewayError::Link(_))
        ));
        assert!(controller.snapshot().events.is_empty());
    }
}
