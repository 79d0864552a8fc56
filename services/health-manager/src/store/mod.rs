//! Store interface.
//!
//! The store holds the desired and actual snapshots plus everything the
//! engine persists between passes: pending start/stop records and crash
//! counts. Durable backends live outside this crate; [`InMemoryStore`] is
//! provided for development and tests.

mod error;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hm_reconcile::{App, AppKey, CrashCount, PendingStartMessage, PendingStopMessage};

pub use error::StoreError;
pub use memory::{InMemoryStore, MemoryStoreConfig, StoreOperation};

/// Storage operations used by the analyzer and sender.
///
/// Maps are keyed by store key and iterate in key order. Batch operations
/// accept empty slices.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with a freshness error if desired or actual state is stale at `now`.
    async fn verify_freshness(&self, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Every application-version known from desired state or heartbeats,
    /// with the crash counts still live at `now`.
    async fn get_apps(&self, now: DateTime<Utc>) -> Result<BTreeMap<AppKey, App>, StoreError>;

    async fn get_pending_start_messages(
        &self,
    ) -> Result<BTreeMap<String, PendingStartMessage>, StoreError>;

    async fn get_pending_stop_messages(
        &self,
    ) -> Result<BTreeMap<String, PendingStopMessage>, StoreError>;

    async fn save_pending_start_messages(
        &self,
        messages: &[PendingStartMessage],
    ) -> Result<(), StoreError>;

    async fn save_pending_stop_messages(
        &self,
        messages: &[PendingStopMessage],
    ) -> Result<(), StoreError>;

    async fn delete_pending_start_messages(
        &self,
        messages: &[PendingStartMessage],
    ) -> Result<(), StoreError>;

    async fn delete_pending_stop_messages(
        &self,
        messages: &[PendingStopMessage],
    ) -> Result<(), StoreError>;

    /// Save crash counts; each one's TTL starts at `now`.
    async fn save_crash_counts(
        &self,
        crash_counts: &[CrashCount],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
