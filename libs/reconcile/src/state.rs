//! Desired and actual state as the engine sees it.
//!
//! These records are produced by components outside the engine (the
//! desired-state fetcher and the heartbeat listener) and arrive already
//! validated. Field names on the wire follow the platform's heartbeat and
//! desired-state payloads.

use chrono::{DateTime, Utc};
use hm_id::{AppGuid, AppVersion, InstanceGuid, NodeGuid, KEY_SEPARATOR};
use serde::{Deserialize, Serialize};

/// Lifecycle state reported in an instance heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Evacuating,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::Crashed => "CRASHED",
            InstanceState::Evacuating => "EVACUATING",
        };
        write!(f, "{}", s)
    }
}

/// A report of one instance, as last heard from its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeartbeat {
    #[serde(rename = "droplet")]
    pub app_guid: AppGuid,

    #[serde(rename = "version")]
    pub app_version: AppVersion,

    #[serde(rename = "instance")]
    pub instance_guid: InstanceGuid,

    #[serde(rename = "index")]
    pub instance_index: u32,

    pub state: InstanceState,

    /// When the node observed the instance enter `state` (unix seconds).
    pub state_timestamp: f64,

    /// The node hosting the instance.
    #[serde(rename = "dea_guid")]
    pub node_guid: NodeGuid,
}

impl InstanceHeartbeat {
    pub fn is_starting(&self) -> bool {
        self.state == InstanceState::Starting
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn is_starting_or_running(&self) -> bool {
        self.is_starting() || self.is_running()
    }

    pub fn is_crashed(&self) -> bool {
        self.state == InstanceState::Crashed
    }

    pub fn is_evacuating(&self) -> bool {
        self.state == InstanceState::Evacuating
    }
}

/// Requested lifecycle of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
}

/// Whether the application's package is ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    Staged,
    Pending,
    Failed,
}

/// Target state for one application-version, as published by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredAppState {
    #[serde(rename = "droplet")]
    pub app_guid: AppGuid,

    #[serde(rename = "version")]
    pub app_version: AppVersion,

    #[serde(rename = "instances")]
    pub number_of_instances: u32,

    pub state: AppState,

    pub package_state: PackageState,
}

impl DesiredAppState {
    /// Only started apps whose package has not failed are reconciled.
    pub fn is_eligible(&self) -> bool {
        self.state == AppState::Started && self.package_state != PackageState::Failed
    }
}

/// How many times the instance at one index has crashed recently.
///
/// Backends persist these with a TTL so a stable app's counters age out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashCount {
    #[serde(rename = "droplet")]
    pub app_guid: AppGuid,

    #[serde(rename = "version")]
    pub app_version: AppVersion,

    pub instance_index: u32,

    pub crash_count: u32,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl CrashCount {
    /// A zeroed counter, created at `now`.
    pub fn new(app_guid: AppGuid, app_version: AppVersion, instance_index: u32, now: DateTime<Utc>) -> Self {
        Self {
            app_guid,
            app_version,
            instance_index,
            crash_count: 0,
            created_at: now,
        }
    }

    /// Store key, unique per (app, version, index).
    pub fn store_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.app_guid,
            self.app_version,
            self.instance_index,
            sep = KEY_SEPARATOR
        )
    }
}
