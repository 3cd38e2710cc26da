/// プロップ（Zigbee エンドデバイス）側のロジック
///
/// 受け取るのは On/Off 属性の変化（トリガー）と 0xFC00 の時刻書き込みだけです。
/// プロップ上のクールダウンはコーディネータと違い、動作そのものを抑止します。

pub mod actuator;
pub mod sleep;

pub use actuator::{trigger_pattern, ActuationPattern, ActuatorError, PropActuator, STARTUP_FLASH};
pub use sleep::{DeepSleepPlatform, SleepError};

use crate::clock::WallClock;
use crate::device::DeviceId;
use crate::registry::COOLDOWN_SECONDS;
use crate::time_sync::format_local;
use crate::zigbee::{attribute, cluster, AttributeValue, AttributeWrite, TRIGGER_OTHER_PROP};
use chrono_tz::Tz;
use log::{debug, info, warn};

/// 属性書き込みに対する動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropAction {
    /// 動作した
    Actuated,
    /// クールダウン中のため無視
    IgnoredCooldown { remaining_ms: u64 },
    /// 時計を合わせた
    ClockSet(u32),
    /// 関係のない属性
    Ignored,
}

pub struct PropController<A: PropActuator, C: WallClock> {
    id: DeviceId,
    actuator: A,
    clock: C,
    timezone: Tz,
    time_synced: bool,
    /// クールダウン終了（起動からのミリ秒）
    cooldown_until_ms: Option<u64>,
}

impl<A: PropActuator, C: WallClock> PropController<A, C> {
    pub fn new(id: DeviceId, actuator: A, clock: C, timezone: Tz) -> Self {
        Self {
            id,
            actuator,
            clock,
            timezone,
            time_synced: false,
            cooldown_until_ms: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn is_time_synced(&self) -> bool {
        self.time_synced
    }

    pub fn is_in_cooldown(&self, now_ms: u64) -> bool {
        self.cooldown_until_ms.is_some_and(|until| now_ms < until)
    }

    /// 起動時の LED 点滅
    pub fn startup(&mut self) -> Result<(), ActuatorError> {
        info!("{} starting, flashing status LED", self.id);
        self.actuator.run(&STARTUP_FLASH)
    }

    /// 受け取った属性書き込みを処理
    ///
    /// `now_ms` は起動からの経過ミリ秒（時刻同期の影響を受けない時計）。
    pub fn handle_attribute(
        &mut self,
        cluster_id: u16,
        attribute_id: u16,
        data: &[u8],
        now_ms: u64,
    ) -> Result<PropAction, ActuatorError> {
        match (cluster_id, attribute_id) {
            (cluster::ON_OFF, attribute::ON_OFF) => {
                // トグルで ON/OFF が交互に来るので、どちらの値でもトリガー
                debug!("On/Off attribute changed: {:02X?}", data);
                self.trigger(now_ms)
            }
            (cluster::TIME_SYNC, attribute::TIME_SYNC_UNIX) => {
                let Ok(bytes) = <[u8; 4]>::try_from(data) else {
                    warn!("Time sync attribute has unexpected size: {} bytes", data.len());
                    return Ok(PropAction::Ignored);
                };
                // ZCL の属性値はリトルエンディアン
                let unix = u32::from_le_bytes(bytes);
                self.apply_time(unix);
                Ok(PropAction::ClockSet(unix))
            }
            _ => {
                debug!(
                    "Ignoring attribute cluster=0x{:04X} attr=0x{:04X}",
                    cluster_id, attribute_id
                );
                Ok(PropAction::Ignored)
            }
        }
    }

    /// トリガー: クールダウン外なら動作し、終わった時点からクールダウン開始
    pub fn trigger(&mut self, now_ms: u64) -> Result<PropAction, ActuatorError> {
        if let Some(until) = self.cooldown_until_ms.filter(|&until| now_ms < until) {
            info!("Ignoring trigger - recently activated (cooldown)");
            return Ok(PropAction::IgnoredCooldown {
                remaining_ms: until - now_ms,
            });
        }

        let pattern = trigger_pattern(self.id);
        info!("{} triggered: {:?}", self.id, pattern);
        self.actuator.run(&pattern)?;

        let finished_ms = now_ms + pattern.duration_ms();
        self.cooldown_until_ms = Some(finished_ms + COOLDOWN_SECONDS * 1000);
        Ok(PropAction::Actuated)
    }

    /// コーディネータから受け取った時刻で時計を合わせる
    pub fn apply_time(&mut self, unix: u32) {
        if let Err(e) = self.clock.set_unix(unix as u64) {
            warn!("Could not set wall clock: {}", e);
        }
        self.time_synced = true;
        info!(
            "Time synchronized from coordinator: {} ({})",
            unix,
            format_local(unix as u64, &self.timezone)
        );
    }

    fn synced_now(&self) -> Option<u64> {
        self.time_synced.then(|| self.clock.now_unix())
    }

    /// 就寝時間帯か（未同期なら false）
    pub fn is_sleep_time(&self) -> bool {
        sleep::is_sleep_time(self.synced_now(), &self.timezone)
    }

    /// 就寝時間帯ならディープスリープに入る
    ///
    /// 実機では戻ってきません。
    pub fn enter_sleep_if_due<P: DeepSleepPlatform>(&self, platform: &P) -> Result<bool, SleepError> {
        if !self.is_sleep_time() {
            return Ok(false);
        }
        let secs = sleep::sleep_duration_secs(self.synced_now(), &self.timezone);
        info!("Entering deep sleep until {}:00", sleep::SLEEP_END_HOUR);
        sleep::sleep_for(platform, secs)?;
        Ok(true)
    }

    /// もう一方のプロップを鳴らす要求（0xFC01 への書き込み内容）
    ///
    /// トリガー要求を持つのはかかしだけです。
    pub fn trigger_request(&self) -> Option<AttributeWrite> {
        if self.id != DeviceId::Scarecrow {
            return None;
        }
        info!("Requesting trigger of {}", self.id.other());
        Some(AttributeWrite {
            source_short: None,
            cluster: cluster::TRIGGER_REQUEST,
            attribute: attribute::TRIGGER_REQUEST_VALUE,
            value: AttributeValue::U8(TRIGGER_OTHER_PROP),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::actuator::{MockActuator, SCARECROW_RELAY, TOMBSTONE_BLINK};
    use super::sleep::MockDeepSleep;
    use super::*;
    use crate::clock::ManualClock;
    use chrono_tz::America::Los_Angeles;

    fn scarecrow() -> (PropController<MockActuator, ManualClock>, MockActuator, ManualClock) {
        let actuator = MockActuator::new();
        let clock = ManualClock::new(0);
        let controller =
            PropController::new(DeviceId::Scarecrow, actuator.clone(), clock.clone(), Los_Angeles);
        (controller, actuator, clock)
    }

    #[test]
    fn test_any_on_off_change_triggers() {
        let (mut prop, actuator, _) = scarecrow();
        assert_eq!(
            prop.handle_attribute(cluster::ON_OFF, attribute::ON_OFF, &[0], 0).unwrap(),
            PropAction::Actuated
        );
        assert_eq!(actuator.runs(), vec![SCARECROW_RELAY]);
    }

    #[test]
    fn test_cooldown_suppresses_actuation_on_prop() {
        let (mut prop, actuator, _) = scarecrow();
        prop.trigger(0).unwrap();
        // 500ms 動作 + 120s
        assert!(matches!(
            prop.trigger(60_000).unwrap(),
            PropAction::IgnoredCooldown { remaining_ms: 60_500 }
        ));
        assert_eq!(prop.trigger(120_500).unwrap(), PropAction::Actuated);
        assert_eq!(actuator.runs().len(), 2);
    }

    #[test]
    fn test_time_sync_attribute_sets_clock() {
        let (mut prop, _, clock) = scarecrow();
        let unix: u32 = 1_761_989_415;
        assert_eq!(
            prop.handle_attribute(cluster::TIME_SYNC, attribute::TIME_SYNC_UNIX, &unix.to_le_bytes(), 0)
                .unwrap(),
            PropAction::ClockSet(unix)
        );
        assert_eq!(clock.now_unix(), unix as u64);
        assert!(prop.is_time_synced());
        assert!(prop.is_sleep_time());

        let platform = MockDeepSleep::new();
        assert!(prop.enter_sleep_if_due(&platform).unwrap());
        assert_eq!(platform.requests(), vec![(3 * 3600 + 29 * 60 + 45) * 1_000_000]);
    }

    #[test]
    fn test_short_time_sync_is_ignored() {
        let (mut prop, _, _) = scarecrow();
        assert_eq!(
            prop.handle_attribute(cluster::TIME_SYNC, attribute::TIME_SYNC_UNIX, &[1, 2], 0)
                .unwrap(),
            PropAction::Ignored
        );
        assert!(!prop.is_time_synced());
    }

    #[test]
    fn test_unsynced_prop_stays_awake() {
        let (prop, _, clock) = scarecrow();
        clock.set_unix(1_761_989_415).unwrap();
        assert!(!prop.is_sleep_time());
        assert!(!prop.enter_sleep_if_due(&MockDeepSleep::new()).unwrap());
    }

    #[test]
    fn test_only_scarecrow_requests_trigger() {
        let (prop, _, _) = scarecrow();
        let request = prop.trigger_request().unwrap();
        assert_eq!(request.cluster, cluster::TRIGGER_REQUEST);
        assert_eq!(request.value, AttributeValue::U8(1));

        let tombstone = PropController::new(
            DeviceId::RipTombstone,
            MockActuator::new(),
            ManualClock::new(0),
            Los_Angeles,
        );
        assert_eq!(tombstone.trigger_request(), None);
        assert_eq!(trigger_pattern(tombstone.id()), TOMBSTONE_BLINK);
    }
}
