/// Device Registry
///
/// コーディネータが把握しているプロップの一覧です。接続状態・時刻同期状態・
/// トリガーのクールダウンを保持し、トリガー送信やステータス応答の前に必ず参照されます。
///
/// 状態遷移:
/// `UNBOUND → (参加) → BOUND,UNSYNCED → (時刻配信) → BOUND,SYNCED → (離脱) → UNBOUND`
///
/// 複数タスク（シリアル受信・Zigbee コールバック・近隣スキャン）から共有されるため、
/// 内部は Mutex で保護しています。

use crate::device::{format_ieee, AllowList, DeviceId};
use crate::link::{DeviceStatus, StatusFlags};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// トリガーのクールダウン時間（秒）
pub const COOLDOWN_SECONDS: u64 = 120;

/// プロップ側のエンドポイント（常に1）
pub const DEFAULT_ENDPOINT: u8 = 1;

/// デバイス1台分の記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// 表示名
    pub name: &'static str,
    /// IEEE アドレス（不変）
    pub hardware_identity: u64,
    /// 参加時に割り当てられるショートアドレス。0 は未参加
    pub network_address: u16,
    pub endpoint: u8,
    pub is_bound: bool,
    /// 参加後に時刻を受け取ったか
    pub time_synced: bool,
    /// 最後に時刻を配信した UNIX 時刻
    pub last_time_sync: u64,
    /// 最後にクールダウン外でトリガーした UNIX 時刻
    pub last_trigger: u64,
}

/// バインド状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    BoundUnsynced,
    BoundSynced,
}

impl DeviceRecord {
    pub fn new(id: DeviceId, hardware_identity: u64) -> Self {
        Self {
            id,
            name: id.name(),
            hardware_identity,
            network_address: 0,
            endpoint: DEFAULT_ENDPOINT,
            is_bound: false,
            time_synced: false,
            last_time_sync: 0,
            last_trigger: 0,
        }
    }

    pub fn state(&self) -> BindingState {
        match (self.is_bound, self.time_synced) {
            (false, _) => BindingState::Unbound,
            (true, false) => BindingState::BoundUnsynced,
            (true, true) => BindingState::BoundSynced,
        }
    }

    /// Zigbee コマンドを送れる状態か
    pub fn is_addressable(&self) -> bool {
        self.is_bound && self.network_address != 0
    }

    pub fn is_in_cooldown(&self, now: u64) -> bool {
        is_in_cooldown(self, now)
    }

    /// クールダウン残り秒数
    pub fn cooldown_remaining(&self, now: u64) -> u64 {
        if self.is_in_cooldown(now) {
            COOLDOWN_SECONDS - now.saturating_sub(self.last_trigger)
        } else {
            0
        }
    }

    pub fn status(&self, now: u64) -> DeviceStatus {
        DeviceStatus {
            connected: self.is_bound,
            time_synced: self.time_synced,
            in_cooldown: self.is_in_cooldown(now),
        }
    }
}

/// `last_trigger > 0 && now - last_trigger < COOLDOWN_SECONDS`
pub fn is_in_cooldown(record: &DeviceRecord, now: u64) -> bool {
    record.last_trigger > 0 && now.saturating_sub(record.last_trigger) < COOLDOWN_SECONDS
}

/// クールダウン外なら `last_trigger` を更新します
///
/// 戻り値はクールダウンを開始したかどうか。クールダウン中の再トリガーは
/// 期間を延長しません。
pub fn record_trigger(record: &mut DeviceRecord, now: u64) -> bool {
    if is_in_cooldown(record, now) {
        false
    } else {
        record.last_trigger = now;
        true
    }
}

/// Registry のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("radio 0x{0:016x} is not on the allow-list")]
    UnknownIdentity(u64),
    #[error("refusing to bind 0x{0:016x} with network address 0")]
    ZeroNetworkAddress(u64),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// `register_or_update` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// 未参加 → 参加に遷移した（時刻配信と参加通知が必要）
    NewlyBound { id: DeviceId, network_address: u16 },
    /// すでに参加済み。ショートアドレスのみ更新されることがある
    AlreadyBound { id: DeviceId, address_changed: bool },
}

/// トリガー送信先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTicket {
    pub id: DeviceId,
    pub network_address: u16,
    pub endpoint: u8,
    /// このトリガーでクールダウンを開始したか
    pub cooldown_started: bool,
}

/// 時刻配信先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTarget {
    pub id: DeviceId,
    pub network_address: u16,
    pub endpoint: u8,
}

/// デバイス登録表
#[derive(Debug)]
pub struct Registry {
    records: Mutex<BTreeMap<DeviceId, DeviceRecord>>,
}

impl Registry {
    /// 許可リストの全デバイスを未参加状態で作成
    pub fn new(allow_list: &AllowList) -> Self {
        let records = allow_list
            .entries()
            .iter()
            .map(|entry| (entry.id, DeviceRecord::new(entry.id, entry.hardware_identity)))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DeviceId, DeviceRecord>> {
        // 各操作はレコード単位で完結しているので、poison されても中身は整合している
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find_by_identity(
        records: &mut BTreeMap<DeviceId, DeviceRecord>,
        hardware_identity: u64,
    ) -> Option<&mut DeviceRecord> {
        records
            .values_mut()
            .find(|record| record.hardware_identity == hardware_identity)
    }

    /// 参加の登録（冪等）
    ///
    /// 未参加のレコードならバインドしてショートアドレスを設定します。この場合
    /// 呼び出し側は時刻配信と参加通知 (0x30) を行います。参加済みなら
    /// ショートアドレスを更新して未同期に戻します。呼び出し側は時刻だけを
    /// 配信し直し、参加通知は送りません。
    pub fn register_or_update(
        &self,
        hardware_identity: u64,
        network_address: u16,
    ) -> RegistryResult<Registration> {
        if network_address == 0 {
            return Err(RegistryError::ZeroNetworkAddress(hardware_identity));
        }

        let mut records = self.lock();
        let record = Self::find_by_identity(&mut records, hardware_identity)
            .ok_or(RegistryError::UnknownIdentity(hardware_identity))?;

        if record.is_bound {
            let address_changed = record.network_address != network_address;
            if address_changed {
                info!(
                    "{}: short address changed 0x{:04X} -> 0x{:04X}",
                    record.name, record.network_address, network_address
                );
                record.network_address = network_address;
            } else {
                debug!("{} re-announced at 0x{:04X}", record.name, network_address);
            }
            // 再参加したプロップは再起動で時計を失っている
            record.time_synced = false;
            return Ok(Registration::AlreadyBound {
                id: record.id,
                address_changed,
            });
        }

        record.is_bound = true;
        record.network_address = network_address;
        record.time_synced = false;
        info!(
            "{} bound (ieee={}, short=0x{:04X})",
            record.name,
            format_ieee(hardware_identity),
            network_address
        );
        Ok(Registration::NewlyBound {
            id: record.id,
            network_address,
        })
    }

    /// 離脱の登録
    ///
    /// 参加中だった場合のみ `Some` を返します（離脱通知は1回だけ）。
    pub fn unbind(&self, hardware_identity: u64) -> RegistryResult<Option<DeviceId>> {
        let mut records = self.lock();
        let record = Self::find_by_identity(&mut records, hardware_identity)
            .ok_or(RegistryError::UnknownIdentity(hardware_identity))?;

        let was_bound = record.is_bound;
        record.is_bound = false;
        record.network_address = 0;
        record.time_synced = false;

        if was_bound {
            info!("{} unbound", record.name);
            Ok(Some(record.id))
        } else {
            debug!("{} was not bound", record.name);
            Ok(None)
        }
    }

    /// トリガーの記録
    ///
    /// 参加中でアドレスがあれば送信先を返します。クールダウンは記録（ステータス報告）
    /// のみを制御し、無線コマンドの送信は止めません。
    pub fn begin_trigger(&self, id: DeviceId, now: u64) -> Option<TriggerTicket> {
        let mut records = self.lock();
        let record = records.get_mut(&id)?;
        if !record.is_addressable() {
            return None;
        }

        let cooldown_started = record_trigger(record, now);
        if !cooldown_started {
            debug!(
                "{} retriggered during cooldown ({}s left), cooldown not extended",
                record.name,
                record.cooldown_remaining(now)
            );
        }
        Some(TriggerTicket {
            id,
            network_address: record.network_address,
            endpoint: record.endpoint,
            cooldown_started,
        })
    }

    /// 時刻配信の完了を記録（クールダウンとは無関係）
    pub fn mark_time_synced(&self, id: DeviceId, now: u64) {
        let mut records = self.lock();
        match records.get_mut(&id) {
            Some(record) if record.is_bound => {
                record.time_synced = true;
                record.last_time_sync = now;
            }
            Some(record) => warn!("{} left before its time sync was recorded", record.name),
            None => warn!("No record for {:?}", id),
        }
    }

    /// 参加中のデバイス一覧（時刻配信先）
    pub fn bound_targets(&self) -> Vec<BoundTarget> {
        self.lock()
            .values()
            .filter(|record| record.is_addressable())
            .map(|record| BoundTarget {
                id: record.id,
                network_address: record.network_address,
                endpoint: record.endpoint,
            })
            .collect()
    }

    pub fn target(&self, id: DeviceId) -> Option<BoundTarget> {
        self.lock()
            .get(&id)
            .filter(|record| record.is_addressable())
            .map(|record| BoundTarget {
                id: record.id,
                network_address: record.network_address,
                endpoint: record.endpoint,
            })
    }

    /// ステータス応答用のフラグ
    pub fn status_flags(&self, now: u64) -> StatusFlags {
        let mut flags = StatusFlags::default();
        for record in self.lock().values() {
            flags.set(record.id, record.status(now));
        }
        flags
    }

    pub fn device_for_address(&self, network_address: u16) -> Option<DeviceId> {
        if network_address == 0 {
            return None;
        }
        self.lock()
            .values()
            .find(|record| record.is_bound && record.network_address == network_address)
            .map(|record| record.id)
    }

    pub fn is_bound(&self, hardware_identity: u64) -> bool {
        self.lock()
            .values()
            .any(|record| record.hardware_identity == hardware_identity && record.is_bound)
    }

    /// レコードのスナップショット
    pub fn record(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.lock().get(&id).cloned()
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        self.lock().values().cloned().collect()
    }
}
