//! Pending start/stop records and the commands the sender publishes.
//!
//! A pending record is created by the analyzer, re-validated by the sender
//! when it comes due, and deleted once it has been sent without keep-alive,
//! has expired, or no longer applies.

use chrono::{DateTime, TimeDelta, Utc};
use hm_id::{AppGuid, AppVersion, InstanceGuid, MessageId, KEY_SEPARATOR};
use serde::{Deserialize, Serialize};

/// When a new record becomes due and how long it stays alive once sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub delay_secs: u64,
    pub keep_alive_secs: u64,
}

impl Schedule {
    /// Due now, deleted as soon as it is sent.
    pub const fn immediate() -> Self {
        Self {
            delay_secs: 0,
            keep_alive_secs: 0,
        }
    }

    pub const fn after(delay_secs: u64, keep_alive_secs: u64) -> Self {
        Self {
            delay_secs,
            keep_alive_secs,
        }
    }
}

/// Adds whole seconds to a timestamp, saturating at the end of time.
pub(crate) fn plus_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fields shared by pending start and stop records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message_id: MessageId,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub send_on: DateTime<Utc>,

    /// Unset until the sender dispatches the record.
    #[serde(with = "chrono::serde::ts_seconds_option", default)]
    pub sent_on: Option<DateTime<Utc>>,

    /// Seconds a sent record suppresses resends before it expires.
    pub keep_alive: u64,

    #[serde(rename = "droplet")]
    pub app_guid: AppGuid,

    #[serde(rename = "version")]
    pub app_version: AppVersion,
}

impl PendingMessage {
    pub fn new(now: DateTime<Utc>, schedule: Schedule, app_guid: AppGuid, app_version: AppVersion) -> Self {
        Self {
            message_id: MessageId::new(),
            send_on: plus_secs(now, schedule.delay_secs),
            sent_on: None,
            keep_alive: schedule.keep_alive_secs,
            app_guid,
            app_version,
        }
    }

    pub fn has_been_sent(&self) -> bool {
        self.sent_on.is_some()
    }

    pub fn is_time_to_send(&self, now: DateTime<Utc>) -> bool {
        self.sent_on.is_none() && self.send_on <= now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.sent_on
            .is_some_and(|sent_on| plus_secs(sent_on, self.keep_alive) <= now)
    }

    /// Records with a keep-alive are kept after sending; the rest are deleted.
    pub fn has_keep_alive(&self) -> bool {
        self.keep_alive > 0
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.sent_on = Some(now);
    }
}

/// Why a start was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartReason {
    Missing,
    Crashed,
    Evacuating,
}

impl std::fmt::Display for StartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StartReason::Missing => "MISSING",
            StartReason::Crashed => "CRASHED",
            StartReason::Evacuating => "EVACUATING",
        };
        write!(f, "{}", s)
    }
}

/// Why a stop was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Extra,
    Duplicate,
    EvacuationComplete,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Extra => "EXTRA",
            StopReason::Duplicate => "DUPLICATE",
            StopReason::EvacuationComplete => "EVACUATION_COMPLETE",
        };
        write!(f, "{}", s)
    }
}

/// A scheduled start, keyed by app, version and index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStartMessage {
    #[serde(flatten)]
    pub message: PendingMessage,

    #[serde(rename = "index")]
    pub instance_index: u32,

    pub priority: f64,

    /// Dispatch without re-checking the current snapshot.
    #[serde(default)]
    pub skip_verification: bool,

    #[serde(rename = "start_reason")]
    pub reason: StartReason,
}

impl PendingStartMessage {
    pub fn new(
        now: DateTime<Utc>,
        schedule: Schedule,
        app_guid: AppGuid,
        app_version: AppVersion,
        instance_index: u32,
        priority: f64,
        reason: StartReason,
    ) -> Self {
        Self {
            message: PendingMessage::new(now, schedule, app_guid, app_version),
            instance_index,
            priority,
            skip_verification: false,
            reason,
        }
    }

    pub fn store_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.message.app_guid,
            self.message.app_version,
            self.instance_index,
            sep = KEY_SEPARATOR
        )
    }
}

/// A scheduled stop, keyed by the target instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStopMessage {
    #[serde(flatten)]
    pub message: PendingMessage,

    #[serde(rename = "instance")]
    pub instance_guid: InstanceGuid,

    #[serde(rename = "stop_reason")]
    pub reason: StopReason,
}

impl PendingStopMessage {
    pub fn new(
        now: DateTime<Utc>,
        schedule: Schedule,
        app_guid: AppGuid,
        app_version: AppVersion,
        instance_guid: InstanceGuid,
        reason: StopReason,
    ) -> Self {
        Self {
            message: PendingMessage::new(now, schedule, app_guid, app_version),
            instance_guid,
            reason,
        }
    }

    pub fn store_key(&self) -> String {
        self.instance_guid.to_string()
    }
}

/// Start command published to the nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub message_id: MessageId,
    pub droplet: AppGuid,
    pub version: AppVersion,
    pub instance_index: u32,
}

impl From<&PendingStartMessage> for StartMessage {
    fn from(pending: &PendingStartMessage) -> Self {
        Self {
            message_id: pending.message.message_id,
            droplet: pending.message.app_guid.clone(),
            version: pending.message.app_version.clone(),
            instance_index: pending.instance_index,
        }
    }
}

/// Stop command published to the nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopMessage {
    pub message_id: MessageId,
    pub droplet: AppGuid,
    pub version: AppVersion,
    pub instance_guid: InstanceGuid,
    pub instance_index: u32,
    pub is_duplicate: bool,
}

impl StopMessage {
    /// The index comes from the live heartbeat since stop records do not carry it.
    pub fn new(pending: &PendingStopMessage, instance_index: u32, is_duplicate: bool) -> Self {
        Self {
            message_id: pending.message.message_id,
            droplet: pending.message.app_guid.clone(),
            version: pending.message.app_version.clone(),
            instance_guid: pending.instance_guid.clone(),
            instance_index,
            is_duplicate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn start(schedule: Schedule) -> PendingStartMessage {
        PendingStartMessage::new(
            now(),
            schedule,
            AppGuid::parse("app-1").unwrap(),
            AppVersion::parse("v1").unwrap(),
            3,
            0.5,
            StartReason::Missing,
        )
    }

    #[test]
    fn test_start_key_and_schedule() {
        let pending = start(Schedule::after(30, 10));
        assert_eq!(pending.store_key(), "app-1:v1:3");
        assert_eq!(pending.message.send_on, now() + TimeDelta::seconds(30));
        assert_eq!(pending.message.keep_alive, 10);
        assert!(!pending.message.has_been_sent());
    }

    #[test]
    fn test_start_keys_of_dashed_guids_do_not_collide() {
        let keyed = |guid: &str, version: &str| {
            PendingStartMessage::new(
                now(),
                Schedule::immediate(),
                AppGuid::parse(guid).unwrap(),
                AppVersion::parse(version).unwrap(),
                0,
                1.0,
                StartReason::Missing,
            )
            .store_key()
        };
        assert_ne!(keyed("a-b", "c"), keyed("a", "b-c"));
    }

    #[test]
    fn test_time_to_send_and_expiry() {
        let mut pending = start(Schedule::after(10, 20));
        let due = now() + TimeDelta::seconds(10);

        assert!(!pending.message.is_time_to_send(now()));
        assert!(pending.message.is_time_to_send(due));
        assert!(!pending.message.is_expired(due));

        pending.message.mark_sent(due);
        assert!(!pending.message.is_time_to_send(due));
        assert!(!pending.message.is_expired(due + TimeDelta::seconds(19)));
        assert!(pending.message.is_expired(due + TimeDelta::seconds(20)));
    }

    #[test]
    fn test_zero_keep_alive_expires_immediately_once_sent() {
        let mut pending = start(Schedule::immediate());
        assert!(pending.message.is_time_to_send(now()));
        assert!(!pending.message.has_keep_alive());

        pending.message.mark_sent(now());
        assert!(pending.message.is_expired(now()));
    }

    #[test]
    fn test_huge_delay_saturates() {
        let pending = start(Schedule::after(u64::MAX, 0));
        assert_eq!(pending.message.send_on, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_pending_start_wire_shape() {
        let pending = start(Schedule::after(0, 30));
        let json = serde_json::to_value(&pending).unwrap();

        assert_eq!(json["droplet"], "app-1");
        assert_eq!(json["version"], "v1");
        assert_eq!(json["index"], 3);
        assert_eq!(json["start_reason"], "MISSING");
        assert_eq!(json["send_on"], 1_700_000_000);
        assert!(json["sent_on"].is_null());

        let back: PendingStartMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, pending);
    }

    #[test]
    fn test_stop_key_and_command() {
        let pending = PendingStopMessage::new(
            now(),
            Schedule::immediate(),
            AppGuid::parse("app-1").unwrap(),
            AppVersion::parse("v1").unwrap(),
            InstanceGuid::parse("inst-9").unwrap(),
            StopReason::EvacuationComplete,
        );
        assert_eq!(pending.store_key(), "inst-9");

        let command = StopMessage::new(&pending, 4, true);
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["instance_guid"], "inst-9");
        assert_eq!(json["instance_index"], 4);
        assert_eq!(json["is_duplicate"], true);
        assert_eq!(json["message_id"], pending.message.message_id.to_string());

        let stop_json = serde_json::to_value(&pending).unwrap();
        assert_eq!(stop_json["stop_reason"], "EVACUATION_COMPLETE");
    }
}
