//! In-memory store for development and tests.
//!
//! Pending records and crash counts are kept in their JSON encoding so
//! reads and writes go through the same serialization a durable backend
//! would use. Desired state and heartbeats are fed in directly by the
//! caller, standing in for the desired-state fetcher and heartbeat listener.
//! Crash counts expire a fixed TTL after their last save.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hm_id::InstanceGuid;
use hm_reconcile::{
    App, AppKey, CrashCount, DesiredAppState, InstanceHeartbeat, PendingStartMessage,
    PendingStopMessage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Store, StoreError};

/// TTLs kept by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// How long a freshness bump keeps actual state valid.
    pub actual_ttl_secs: u64,

    /// How long a freshness bump keeps desired state valid.
    pub desired_ttl_secs: u64,

    /// How long a saved crash count survives without being saved again.
    pub crash_count_ttl_secs: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            actual_ttl_secs: 30,
            desired_ttl_secs: 120,
            crash_count_ttl_secs: 2 * hm_reconcile::DEFAULT_MAXIMUM_BACKOFF_DELAY_SECS,
        }
    }
}

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOperation {
    VerifyFreshness,
    GetApps,
    GetPendingStarts,
    GetPendingStops,
    SavePendingStarts,
    SavePendingStops,
    DeletePendingStarts,
    DeletePendingStops,
    SaveCrashCounts,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreOperation::VerifyFreshness => "verify_freshness",
            StoreOperation::GetApps => "get_apps",
            StoreOperation::GetPendingStarts => "get_pending_start_messages",
            StoreOperation::GetPendingStops => "get_pending_stop_messages",
            StoreOperation::SavePendingStarts => "save_pending_start_messages",
            StoreOperation::SavePendingStops => "save_pending_stop_messages",
            StoreOperation::DeletePendingStarts => "delete_pending_start_messages",
            StoreOperation::DeletePendingStops => "delete_pending_stop_messages",
            StoreOperation::SaveCrashCounts => "save_crash_counts",
        };
        write!(f, "{}", s)
    }
}

#[derive(Default)]
struct MemoryState {
    desired: BTreeMap<AppKey, DesiredAppState>,
    heartbeats: BTreeMap<InstanceGuid, InstanceHeartbeat>,
    crash_counts: BTreeMap<String, StoredCrashCount>,
    pending_starts: BTreeMap<String, Vec<u8>>,
    pending_stops: BTreeMap<String, Vec<u8>>,
    desired_fresh_until: Option<DateTime<Utc>>,
    actual_fresh_until: Option<DateTime<Utc>>,
    failures: BTreeSet<StoreOperation>,
}

struct StoredCrashCount {
    expires_at: DateTime<Utc>,
    bytes: Vec<u8>,
}

impl MemoryState {
    fn check(&self, operation: StoreOperation) -> Result<(), StoreError> {
        if self.failures.contains(&operation) {
            return Err(StoreError::Unavailable(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }
}

/// A [`Store`] held entirely in process memory.
pub struct InMemoryStore {
    config: MemoryStoreConfig,
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    /// Create an empty store. Nothing is fresh until it is bumped.
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Mark desired state as fresh for the desired TTL starting at `now`.
    pub async fn bump_desired_freshness(&self, now: DateTime<Utc>) {
        let until = expiry(now, self.config.desired_ttl_secs);
        self.state.write().await.desired_fresh_until = Some(until);
    }

    /// Mark actual state as fresh for the actual TTL starting at `now`.
    pub async fn bump_actual_freshness(&self, now: DateTime<Utc>) {
        let until = expiry(now, self.config.actual_ttl_secs);
        self.state.write().await.actual_fresh_until = Some(until);
    }

    /// Replace the whole desired snapshot.
    pub async fn sync_desired_state(&self, desired: Vec<DesiredAppState>) {
        let mut state = self.state.write().await;
        state.desired = desired
            .into_iter()
            .map(|d| (AppKey::new(d.app_guid.clone(), d.app_version.clone()), d))
            .collect();
    }

    /// Insert or replace the desired state of one application-version.
    pub async fn save_desired_state(&self, desired: DesiredAppState) {
        let key = AppKey::new(desired.app_guid.clone(), desired.app_version.clone());
        self.state.write().await.desired.insert(key, desired);
    }

    pub async fn delete_desired_state(&self, key: &AppKey) {
        self.state.write().await.desired.remove(key);
    }

    /// Record heartbeats, replacing earlier reports of the same instance.
    pub async fn save_heartbeats(&self, heartbeats: Vec<InstanceHeartbeat>) {
        let mut state = self.state.write().await;
        for heartbeat in heartbeats {
            state
                .heartbeats
                .insert(heartbeat.instance_guid.clone(), heartbeat);
        }
    }

    pub async fn delete_heartbeat(&self, instance_guid: &InstanceGuid) {
        self.state.write().await.heartbeats.remove(instance_guid);
    }

    /// Make every later call of `operation` fail with [`StoreError::Unavailable`].
    pub async fn fail_on(&self, operation: StoreOperation) {
        self.state.write().await.failures.insert(operation);
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.failures.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn is_fresh(fresh_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    fresh_until.is_some_and(|until| now < until)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_all<T: DeserializeOwned>(
    records: &BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, T>, StoreError> {
    records
        .iter()
        .map(|(key, bytes)| -> Result<(String, T), StoreError> {
            Ok((key.clone(), serde_json::from_slice(bytes)?))
        })
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn verify_freshness(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let state = self.state.read().await;
        state.check(StoreOperation::VerifyFreshness)?;

        let desired_fresh = is_fresh(state.desired_fresh_until, now);
        let actual_fresh = is_fresh(state.actual_fresh_until, now);
        match StoreError::from_freshness(desired_fresh, actual_fresh) {
            Some(stale) => Err(stale),
            None => Ok(()),
        }
    }

    async fn get_apps(&self, now: DateTime<Utc>) -> Result<BTreeMap<AppKey, App>, StoreError> {
        let state = self.state.read().await;
        state.check(StoreOperation::GetApps)?;

        let mut heartbeats: BTreeMap<AppKey, Vec<InstanceHeartbeat>> = BTreeMap::new();
        for heartbeat in state.heartbeats.values() {
            let key = AppKey::new(heartbeat.app_guid.clone(), heartbeat.app_version.clone());
            heartbeats.entry(key).or_default().push(heartbeat.clone());
        }

        let mut crash_counts: BTreeMap<AppKey, BTreeMap<u32, CrashCount>> = BTreeMap::new();
        for stored in state.crash_counts.values() {
            if stored.expires_at <= now {
                continue;
            }
            let count: CrashCount = serde_json::from_slice(&stored.bytes)?;
            let key = AppKey::new(count.app_guid.clone(), count.app_version.clone());
            crash_counts
                .entry(key)
                .or_default()
                .insert(count.instance_index, count);
        }

        let keys: BTreeSet<AppKey> = state
            .desired
            .keys()
            .chain(heartbeats.keys())
            .cloned()
            .collect();

        let apps = keys
            .into_iter()
            .map(|key| {
                let app = App::new(
                    key.clone(),
                    state.desired.get(&key).cloned(),
                    heartbeats.remove(&key).unwrap_or_default(),
                    crash_counts.remove(&key).unwrap_or_default(),
                );
                (key, app)
            })
            .collect();

        Ok(apps)
    }

    async fn get_pending_start_messages(
        &self,
    ) -> Result<BTreeMap<String, PendingStartMessage>, StoreError> {
        let state = self.state.read().await;
        state.check(StoreOperation::GetPendingStarts)?;
        decode_all(&state.pending_starts)
    }

    async fn get_pending_stop_messages(
        &self,
    ) -> Result<BTreeMap<String, PendingStopMessage>, StoreError> {
        let state = self.state.read().await;
        state.check(StoreOperation::GetPendingStops)?;
        decode_all(&state.pending_stops)
    }

    async fn save_pending_start_messages(
        &self,
        messages: &[PendingStartMessage],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOperation::SavePendingStarts)?;
        for message in messages {
            state.pending_starts.insert(message.store_key(), encode(message)?);
        }
        debug!(count = messages.len(), "Saved pending start messages");
        Ok(())
    }

    async fn save_pending_stop_messages(
        &self,
        messages: &[PendingStopMessage],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOperation::SavePendingStops)?;
        for message in messages {
            state.pending_stops.insert(message.store_key(), encode(message)?);
        }
        debug!(count = messages.len(), "Saved pending stop messages");
        Ok(())
    }

    async fn delete_pending_start_messages(
        &self,
        messages: &[PendingStartMessage],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOperation::DeletePendingStarts)?;
        for message in messages {
            state.pending_starts.remove(&message.store_key());
        }
        debug!(count = messages.len(), "Deleted pending start messages");
        Ok(())
    }

    async fn delete_pending_stop_messages(
        &self,
        messages: &[PendingStopMessage],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(StoreOperation::DeletePendingStops)?;
        for message in messages {
            state.pending_stops.remove(&message.store_key());
        }
        debug!(count = messages.len(), "Deleted pending stop messages");
        Ok(())
    }

    async fn save_crash_counts(
        &self,
        crash_counts: &[CrashCount],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expires_at = expiry(now, self.config.crash_count_ttl_secs);
        let mut state = self.state.write().await;
        state.check(StoreOperation::SaveCrashCounts)?;
        state.crash_counts.retain(|_, stored| stored.expires_at > now);
        for count in crash_counts {
            let stored = StoredCrashCount {
                expires_at,
                bytes: encode(count)?,
            };
            state.crash_counts.insert(count.store_key(), stored);
        }
        debug!(count = crash_counts.len(), "Saved crash counts");
        Ok(())
    }
}
