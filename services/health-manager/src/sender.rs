//! Dispatch pass.
//!
//! Turns due pending records into start/stop commands. Every due record is
//! re-validated against the current snapshot first, starts go out in
//! descending priority with a per-pass cap, and store mutations are
//! written once all sends are done.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hm_reconcile::{
    App, AppKey, PendingStartMessage, PendingStopMessage, StartMessage, StopMessage,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::error::EngineError;
use crate::store::Store;
use crate::transport::{Publisher, TransportError};

/// Sender settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Start commands allowed per pass. Stops are not capped.
    pub message_limit: usize,
    pub start_subject: String,
    pub stop_subject: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            message_limit: 30,
            start_subject: "health.start".to_string(),
            stop_subject: "health.stop".to_string(),
        }
    }
}

/// Counts from one send pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub starts_sent: usize,
    pub stops_sent: usize,
    /// Start records removed: expired, invalid, or sent without keep-alive.
    pub starts_deleted: usize,
    pub stops_deleted: usize,
    /// Due, valid starts held back by the per-pass cap.
    pub starts_throttled: usize,
}

/// Store mutations collected during a pass.
#[derive(Default)]
struct Changes {
    starts_to_save: Vec<PendingStartMessage>,
    starts_to_delete: Vec<PendingStartMessage>,
    stops_to_save: Vec<PendingStopMessage>,
    stops_to_delete: Vec<PendingStopMessage>,
}

enum StopVerdict {
    Send { instance_index: u32, is_duplicate: bool },
    Drop(&'static str),
}

/// Runs dispatch passes.
pub struct Sender {
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    config: SenderConfig,
}

impl Sender {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn Publisher>, config: SenderConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Run one pass at `now`.
    ///
    /// A publish failure stops further sends; the mutations gathered up to
    /// that point are still written before the failure is returned.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn send(&self, now: DateTime<Utc>) -> Result<SendSummary, EngineError> {
        self.store.verify_freshness(now).await?;

        let starts = self.store.get_pending_start_messages().await?;
        let stops = self.store.get_pending_stop_messages().await?;
        let apps = self.store.get_apps(now).await?;

        let mut summary = SendSummary::default();
        let mut changes = Changes::default();

        let dispatched = match self
            .send_starts(now, starts, &apps, &mut changes, &mut summary)
            .await
        {
            Ok(()) => self.send_stops(now, stops, &apps, &mut changes, &mut summary).await,
            Err(e) => Err(e),
        };

        self.persist(&changes).await?;

        if let Err(e) = dispatched {
            error!(error = %e, "Aborted send pass after publish failure");
            return Err(e.into());
        }

        info!(
            starts_sent = summary.starts_sent,
            stops_sent = summary.stops_sent,
            starts_deleted = summary.starts_deleted,
            stops_deleted = summary.stops_deleted,
            starts_throttled = summary.starts_throttled,
            "Send complete"
        );

        Ok(summary)
    }

    async fn send_starts(
        &self,
        now: DateTime<Utc>,
        starts: BTreeMap<String, PendingStartMessage>,
        apps: &BTreeMap<AppKey, App>,
        changes: &mut Changes,
        summary: &mut SendSummary,
    ) -> Result<(), TransportError> {
        let mut starts: Vec<PendingStartMessage> = starts.into_values().collect();
        starts.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        for mut start in starts {
            if start.message.is_expired(now) {
                debug!(message_id = %start.message.message_id, "Deleting expired start");
                summary.starts_deleted += 1;
                changes.starts_to_delete.push(start);
                continue;
            }

            if !start.message.is_time_to_send(now) {
                continue;
            }

            if !start.skip_verification {
                if let Some(why) = invalid_start(apps, &start) {
                    info!(
                        app_guid = %start.message.app_guid,
                        app_version = %start.message.app_version,
                        index = start.instance_index,
                        message_id = %start.message.message_id,
                        "Deleting start that no longer applies: {}", why
                    );
                    summary.starts_deleted += 1;
                    changes.starts_to_delete.push(start);
                    continue;
                }
            }

            if summary.starts_sent >= self.config.message_limit {
                summary.starts_throttled += 1;
                continue;
            }

            self.publish(&self.config.start_subject, &StartMessage::from(&start))
                .await?;
            info!(
                app_guid = %start.message.app_guid,
                app_version = %start.message.app_version,
                index = start.instance_index,
                message_id = %start.message.message_id,
                reason = %start.reason,
                priority = start.priority,
                "Sent start"
            );
            summary.starts_sent += 1;

            if start.message.has_keep_alive() {
                start.message.mark_sent(now);
                changes.starts_to_save.push(start);
            } else {
                summary.starts_deleted += 1;
                changes.starts_to_delete.push(start);
            }
        }

        Ok(())
    }

    async fn send_stops(
        &self,
        now: DateTime<Utc>,
        stops: BTreeMap<String, PendingStopMessage>,
        apps: &BTreeMap<AppKey, App>,
        changes: &mut Changes,
        summary: &mut SendSummary,
    ) -> Result<(), TransportError> {
        for mut stop in stops.into_values() {
            if stop.message.is_expired(now) {
                debug!(message_id = %stop.message.message_id, "Deleting expired stop");
                summary.stops_deleted += 1;
                changes.stops_to_delete.push(stop);
                continue;
            }

            if !stop.message.is_time_to_send(now) {
                continue;
            }

            let (instance_index, is_duplicate) = match verify_stop(apps, &stop) {
                StopVerdict::Send {
                    instance_index,
                    is_duplicate,
                } => (instance_index, is_duplicate),
                StopVerdict::Drop(why) => {
                    info!(
                        app_guid = %stop.message.app_guid,
                        app_version = %stop.message.app_version,
                        instance_guid = %stop.instance_guid,
                        message_id = %stop.message.message_id,
                        "Deleting stop without sending: {}", why
                    );
                    summary.stops_deleted += 1;
                    changes.stops_to_delete.push(stop);
                    continue;
                }
            };

            self.publish(
                &self.config.stop_subject,
                &StopMessage::new(&stop, instance_index, is_duplicate),
            )
            .await?;
            info!(
                app_guid = %stop.message.app_guid,
                app_version = %stop.message.app_version,
                instance_guid = %stop.instance_guid,
                index = instance_index,
                message_id = %stop.message.message_id,
                reason = %stop.reason,
                is_duplicate,
                "Sent stop"
            );
            summary.stops_sent += 1;

            if stop.message.has_keep_alive() {
                stop.message.mark_sent(now);
                changes.stops_to_save.push(stop);
            } else {
                summary.stops_deleted += 1;
                changes.stops_to_delete.push(stop);
            }
        }

        Ok(())
    }

    async fn publish<T: Serialize>(&self, subject: &str, command: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(command)?;
        if let Err(e) = self.publisher.publish(subject, payload).await {
            error!(error = %e, subject, "Failed to publish");
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self, changes: &Changes) -> Result<(), EngineError> {
        if let Err(e) = self.store.save_pending_start_messages(&changes.starts_to_save).await {
            error!(error = %e, "Failed to save sent start messages");
            return Err(e.into());
        }

        if let Err(e) = self.store.delete_pending_start_messages(&changes.starts_to_delete).await {
            error!(error = %e, "Failed to delete start messages");
            return Err(e.into());
        }

        if let Err(e) = self.store.save_pending_stop_messages(&changes.stops_to_save).await {
            error!(error = %e, "Failed to save sent stop messages");
            return Err(e.into());
        }

        if let Err(e) = self.store.delete_pending_stop_messages(&changes.stops_to_delete).await {
            error!(error = %e, "Failed to delete stop messages");
            return Err(e.into());
        }

        Ok(())
    }
}

/// Why a due start should be dropped, if it should.
fn invalid_start(apps: &BTreeMap<AppKey, App>, start: &PendingStartMessage) -> Option<&'static str> {
    let key = AppKey::new(start.message.app_guid.clone(), start.message.app_version.clone());
    let Some(app) = apps.get(&key) else {
        return Some("app no longer exists");
    };

    if !app.is_desired() {
        return Some("app is no longer desired");
    }
    if !app.is_index_desired(start.instance_index) {
        return Some("index is no longer desired");
    }
    if app.has_starting_or_running_at_index(start.instance_index) {
        return Some("index already has a starting or running instance");
    }

    None
}

/// Decide whether a due stop still applies.
///
/// The sole starting or running instance at a desired index is never stopped.
fn verify_stop(apps: &BTreeMap<AppKey, App>, stop: &PendingStopMessage) -> StopVerdict {
    let key = AppKey::new(stop.message.app_guid.clone(), stop.message.app_version.clone());
    let Some(app) = apps.get(&key) else {
        return StopVerdict::Drop("app no longer exists");
    };

    let Some(instance) = app.instance_with_guid(&stop.instance_guid) else {
        return StopVerdict::Drop("instance is no longer reported");
    };
    let instance_index = instance.instance_index;

    if !app.is_desired() || !app.is_index_desired(instance_index) {
        return StopVerdict::Send {
            instance_index,
            is_duplicate: false,
        };
    }

    if instance.is_evacuating() || app.starting_or_running_at_index(instance_index).len() > 1 {
        return StopVerdict::Send {
            instance_index,
            is_duplicate: true,
        };
    }

    StopVerdict::Drop("instance is the only one at a desired index")
}
