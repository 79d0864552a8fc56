//! Test harness for health manager integration tests.
//!
//! Wires an analyzer and a sender to one in-memory store and a mock
//! publisher, with builders for desired state and heartbeats.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use hm_health_manager::store::InMemoryStore;
use hm_health_manager::transport::{MockPublisher, PublishedMessage};
use hm_health_manager::{Analyzer, Sender, SenderConfig};
use hm_id::{AppGuid, AppVersion, InstanceGuid, NodeGuid};
use hm_reconcile::{
    AnalyzerConfig, AppState, DesiredAppState, InstanceHeartbeat, InstanceState, PackageState,
    StartMessage, StopMessage,
};

pub const VERSION: &str = "v1";

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

pub fn desired(app: &str, instances: u32) -> DesiredAppState {
    DesiredAppState {
        app_guid: AppGuid::parse(app).unwrap(),
        app_version: AppVersion::parse(VERSION).unwrap(),
        number_of_instances: instances,
        state: AppState::Started,
        package_state: PackageState::Staged,
    }
}

pub fn heartbeat(app: &str, instance: &str, index: u32, state: InstanceState) -> InstanceHeartbeat {
    InstanceHeartbeat {
        app_guid: AppGuid::parse(app).unwrap(),
        app_version: AppVersion::parse(VERSION).unwrap(),
        instance_guid: InstanceGuid::parse(instance).unwrap(),
        instance_index: index,
        state,
        state_timestamp: 0.0,
        node_guid: NodeGuid::parse("dea-1").unwrap(),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub publisher: Arc<MockPublisher>,
    pub analyzer: Analyzer,
    pub sender: Sender,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(SenderConfig::default(), MockPublisher::new())
    }

    pub fn with(sender_config: SenderConfig, publisher: MockPublisher) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let publisher = Arc::new(publisher);
        let analyzer = Analyzer::new(store.clone(), AnalyzerConfig::default());
        let sender = Sender::new(store.clone(), publisher.clone(), sender_config);

        Self {
            store,
            publisher,
            analyzer,
            sender,
        }
    }

    /// Mark both halves of the snapshot fresh as of `now`.
    pub async fn refresh(&self, now: DateTime<Utc>) {
        self.store.bump_desired_freshness(now).await;
        self.store.bump_actual_freshness(now).await;
    }

    pub async fn starts_sent(&self) -> Vec<StartMessage> {
        decode_all(self.publisher.published_on("health.start").await)
    }

    pub async fn stops_sent(&self) -> Vec<StopMessage> {
        decode_all(self.publisher.published_on("health.stop").await)
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(messages: Vec<PublishedMessage>) -> Vec<T> {
    messages.iter().map(|m| m.decode().unwrap()).collect()
}
