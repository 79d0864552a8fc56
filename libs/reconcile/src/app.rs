//! The per application-version aggregate the engine reasons about.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hm_id::{AppGuid, AppVersion, InstanceGuid};

use crate::state::{CrashCount, DesiredAppState, InstanceHeartbeat, PackageState};

/// Identity of an application-version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppKey {
    pub app_guid: AppGuid,
    pub app_version: AppVersion,
}

impl AppKey {
    pub fn new(app_guid: AppGuid, app_version: AppVersion) -> Self {
        Self { app_guid, app_version }
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.app_guid, self.app_version)
    }
}

/// One application-version: desired state, heartbeats and crash history.
///
/// Rebuilt from the store every pass and never mutated afterwards. The
/// heartbeats-by-index lookup is computed once in [`App::new`].
#[derive(Debug, Clone)]
pub struct App {
    key: AppKey,
    desired: Option<DesiredAppState>,
    heartbeats: Vec<InstanceHeartbeat>,
    crash_counts: BTreeMap<u32, CrashCount>,
    by_index: BTreeMap<u32, Vec<usize>>,
}

impl App {
    /// Build an aggregate. `desired` is `None` when the controller no longer
    /// knows the app but nodes still report instances of it.
    pub fn new(
        key: AppKey,
        desired: Option<DesiredAppState>,
        heartbeats: Vec<InstanceHeartbeat>,
        crash_counts: BTreeMap<u32, CrashCount>,
    ) -> Self {
        let mut by_index: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (position, heartbeat) in heartbeats.iter().enumerate() {
            by_index
                .entry(heartbeat.instance_index)
                .or_default()
                .push(position);
        }

        Self {
            key,
            desired,
            heartbeats,
            crash_counts,
            by_index,
        }
    }

    pub fn key(&self) -> &AppKey {
        &self.key
    }

    pub fn app_guid(&self) -> &AppGuid {
        &self.key.app_guid
    }

    pub fn app_version(&self) -> &AppVersion {
        &self.key.app_version
    }

    pub fn desired(&self) -> Option<&DesiredAppState> {
        self.desired.as_ref()
    }

    pub fn heartbeats(&self) -> &[InstanceHeartbeat] {
        &self.heartbeats
    }

    pub fn crash_counts(&self) -> &BTreeMap<u32, CrashCount> {
        &self.crash_counts
    }

    /// True when a started, non-failed desired state exists for the app.
    pub fn is_desired(&self) -> bool {
        self.desired.as_ref().is_some_and(DesiredAppState::is_eligible)
    }

    pub fn is_staged(&self) -> bool {
        self.is_desired()
            && self
                .desired
                .as_ref()
                .is_some_and(|d| d.package_state == PackageState::Staged)
    }

    /// Desired instance count; 0 when the app is not desired.
    pub fn number_of_desired_instances(&self) -> u32 {
        match &self.desired {
            Some(desired) if desired.is_eligible() => desired.number_of_instances,
            _ => 0,
        }
    }

    pub fn is_index_desired(&self, index: u32) -> bool {
        index < self.number_of_desired_instances()
    }

    /// Every index that has at least one heartbeat, ascending.
    pub fn reported_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_index.keys().copied()
    }

    pub fn heartbeats_at_index(&self, index: u32) -> impl Iterator<Item = &InstanceHeartbeat> + '_ {
        self.by_index
            .get(&index)
            .into_iter()
            .flatten()
            .map(move |&position| &self.heartbeats[position])
    }

    pub fn starting_or_running_at_index(&self, index: u32) -> Vec<&InstanceHeartbeat> {
        self.heartbeats_at_index(index)
            .filter(|h| h.is_starting_or_running())
            .collect()
    }

    pub fn evacuating_at_index(&self, index: u32) -> Vec<&InstanceHeartbeat> {
        self.heartbeats_at_index(index)
            .filter(|h| h.is_evacuating())
            .collect()
    }

    pub fn has_starting_or_running_at_index(&self, index: u32) -> bool {
        self.heartbeats_at_index(index).any(InstanceHeartbeat::is_starting_or_running)
    }

    pub fn has_running_at_index(&self, index: u32) -> bool {
        self.heartbeats_at_index(index).any(InstanceHeartbeat::is_running)
    }

    pub fn has_starting_at_index(&self, index: u32) -> bool {
        self.heartbeats_at_index(index).any(InstanceHeartbeat::is_starting)
    }

    pub fn has_crashed_at_index(&self, index: u32) -> bool {
        self.heartbeats_at_index(index).any(InstanceHeartbeat::is_crashed)
    }

    pub fn has_evacuating_at_index(&self, index: u32) -> bool {
        self.heartbeats_at_index(index).any(InstanceHeartbeat::is_evacuating)
    }

    pub fn has_starting_or_running_instances(&self) -> bool {
        self.heartbeats.iter().any(InstanceHeartbeat::is_starting_or_running)
    }

    /// Desired indices currently covered by a starting or running instance.
    pub fn number_of_desired_indices_with_starting_or_running(&self) -> u32 {
        let count = self
            .by_index
            .keys()
            .filter(|&&index| self.is_index_desired(index) && self.has_starting_or_running_at_index(index))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Starting, running or evacuating instances at undesired indices.
    pub fn extra_instances(&self) -> Vec<&InstanceHeartbeat> {
        self.heartbeats
            .iter()
            .filter(|h| !self.is_index_desired(h.instance_index))
            .filter(|h| h.is_starting_or_running() || h.is_evacuating())
            .collect()
    }

    pub fn instance_with_guid(&self, instance_guid: &InstanceGuid) -> Option<&InstanceHeartbeat> {
        self.heartbeats
            .iter()
            .find(|h| &h.instance_guid == instance_guid)
    }

    /// The stored crash count at `index`, or a fresh zero count created `now`.
    pub fn crash_count_at_index(&self, index: u32, now: DateTime<Utc>) -> CrashCount {
        self.crash_counts.get(&index).cloned().unwrap_or_else(|| {
            CrashCount::new(self.key.app_guid.clone(), self.key.app_version.clone(), index, now)
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders shared by the analyzer tests.

    use super::*;
    use crate::state::{AppState, InstanceState};
    use hm_id::NodeGuid;

    pub fn key() -> AppKey {
        AppKey::new(AppGuid::parse("app-1").unwrap(), AppVersion::parse("v1").unwrap())
    }

    pub fn desired(instances: u32) -> DesiredAppState {
        let key = key();
        DesiredAppState {
            app_guid: key.app_guid,
            app_version: key.app_version,
            number_of_instances: instances,
            state: AppState::Started,
            package_state: PackageState::Staged,
        }
    }

    pub fn heartbeat(guid: &str, index: u32, state: InstanceState) -> InstanceHeartbeat {
        let key = key();
        InstanceHeartbeat {
            app_guid: key.app_guid,
            app_version: key.app_version,
            instance_guid: InstanceGuid::parse(guid).unwrap(),
            instance_index: index,
            state,
            state_timestamp: 0.0,
            node_guid: NodeGuid::parse("dea-1").unwrap(),
        }
    }

    pub fn app(desired: Option<DesiredAppState>, heartbeats: Vec<InstanceHeartbeat>) -> App {
        App::new(key(), desired, heartbeats, BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use crate::state::{AppState, InstanceState};

    #[test]
    fn test_index_lookup_groups_heartbeats() {
        let app = app(
            Some(desired(3)),
            vec![
                heartbeat("a", 0, InstanceState::Running),
                heartbeat("b", 0, InstanceState::Starting),
                heartbeat("c", 2, InstanceState::Crashed),
            ],
        );

        assert_eq!(app.heartbeats_at_index(0).count(), 2);
        assert_eq!(app.heartbeats_at_index(1).count(), 0);
        assert!(app.has_crashed_at_index(2));
        assert!(!app.has_starting_or_running_at_index(2));
        assert_eq!(app.reported_indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(app.number_of_desired_indices_with_starting_or_running(), 1);
    }

    #[test]
    fn test_undesired_app_has_no_desired_indices() {
        let app = app(None, vec![heartbeat("a", 0, InstanceState::Running)]);
        assert!(!app.is_desired());
        assert_eq!(app.number_of_desired_instances(), 0);
        assert!(!app.is_index_desired(0));
        assert_eq!(app.extra_instances().len(), 1);
    }

    #[test]
    fn test_stopped_app_is_not_desired() {
        let mut stopped = desired(2);
        stopped.state = AppState::Stopped;
        let app = app(Some(stopped), vec![]);
        assert!(!app.is_desired());
        assert_eq!(app.number_of_desired_instances(), 0);
    }

    #[test]
    fn test_extra_instances_include_evacuating_but_not_crashed() {
        let app = app(
            Some(desired(1)),
            vec![
                heartbeat("a", 0, InstanceState::Running),
                heartbeat("b", 1, InstanceState::Evacuating),
                heartbeat("c", 2, InstanceState::Crashed),
                heartbeat("d", 3, InstanceState::Starting),
            ],
        );

        let extras: Vec<_> = app
            .extra_instances()
            .into_iter()
            .map(|h| h.instance_guid.to_string())
            .collect();
        assert_eq!(extras, vec!["b", "d"]);
    }

    #[test]
    fn test_missing_crash_count_defaults_to_zero() {
        let app = app(Some(desired(1)), vec![]);
        let now = chrono::Utc::now();
        let count = app.crash_count_at_index(0, now);
        assert_eq!(count.crash_count, 0);
        assert_eq!(count.created_at, now);
        assert_eq!(count.store_key(), "app-1:v1:0");
    }
}
