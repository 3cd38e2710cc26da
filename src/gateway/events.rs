use crate::device::DeviceId;
use crate::link::TriggerTarget;
use heapless::HistoryBuffer;
use log::info;

/// イベントログの最大件数（古いものから上書き）
pub const MAX_EVENTS: usize = 50;

/// ゲートウェイで観測したイベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MotionDetected,
    MotionStopped,
    TriggerRip,
    TriggerHalloween,
    TriggerBoth,
    DeviceJoined,
    DeviceLeft,
}

impl EventKind {
    /// API で使う種別名
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MotionDetected => "motion_detected",
            EventKind::MotionStopped => "motion_stopped",
            EventKind::TriggerRip => "trigger_rip",
            EventKind::TriggerHalloween => "trigger_halloween",
            EventKind::TriggerBoth => "trigger_both",
            EventKind::DeviceJoined => "device_joined",
            EventKind::DeviceLeft => "device_left",
        }
    }

    /// ログ・画面用の表示名
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::MotionDetected => "Motion Detected",
            EventKind::MotionStopped => "Motion Stopped",
            EventKind::TriggerRip => "Trigger RIP",
            EventKind::TriggerHalloween => "Trigger Pumpkin Scarecrow",
            EventKind::TriggerBoth => "Trigger Both",
            EventKind::DeviceJoined => "Device Joined",
            EventKind::DeviceLeft => "Device Left",
        }
    }

    pub fn for_trigger(target: TriggerTarget) -> Self {
        match target {
            TriggerTarget::Rip => EventKind::TriggerRip,
            TriggerTarget::Scarecrow => EventKind::TriggerHalloween,
            TriggerTarget::Both => EventKind::TriggerBoth,
        }
    }
}

/// イベント1件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// UNIX 時刻（秒）
    pub timestamp: u64,
    pub kind: EventKind,
    /// 参加・離脱イベントの対象
    pub device: Option<DeviceId>,
}

/// 直近のイベントを保持するリングバッファ
pub struct EventLog {
    buffer: HistoryBuffer<Event, MAX_EVENTS>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            buffer: HistoryBuffer::new(),
        }
    }

    pub fn push(&mut self, event: Event) {
        match event.device {
            Some(device) => info!("Event logged: {} - {}", event.kind.label(), device.name()),
            None => info!("Event logged: {}", event.kind.label()),
        }
        self.buffer.write(event);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    /// 新しい順に最大 `limit` 件
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let mut events: Vec<Event> = self.buffer.oldest_ordered().copied().collect();
        events.reverse();
        events.truncate(limit);
        events
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: u64) -> Event {
        Event {
            timestamp,
            kind: EventKind::MotionDetected,
            device: None,
        }
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut log = EventLog::new();
        for t in 1..=3 {
            log.push(event(t));
        }
        let stamps: Vec<u64> = log.recent(20).iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3, 2, 1]);
    }

    #[test]
    fn test_oldest_entries_are_overwritten() {
        let mut log = EventLog::new();
        for t in 1..=(MAX_EVENTS as u64 + 5) {
            log.push(event(t));
        }
        assert_eq!(log.len(), MAX_EVENTS);
        let all = log.recent(MAX_EVENTS);
        assert_eq!(all.first().map(|e| e.timestamp), Some(MAX_EVENTS as u64 + 5));
        assert_eq!(all.last().map(|e| e.timestamp), Some(6));
        assert_eq!(log.recent(20).len(), 20);
    }

    #[test]
    fn test_trigger_event_kinds() {
        assert_eq!(EventKind::for_trigger(TriggerTarget::Scarecrow).as_str(), "trigger_halloween");
        assert_eq!(EventKind::for_trigger(TriggerTarget::Both).as_str(), "trigger_both");
    }
}
