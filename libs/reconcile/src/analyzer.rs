//! Per application-version decision logic.
//!
//! [`AppAnalyzer`] compares one [`App`] against the records already queued
//! and produces the new start records, stop records and crash-count
//! increments for that application-version. It is built fresh for every app
//! on every pass and keeps no state across apps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::app::App;
use crate::backoff::CrashBackoff;
use crate::messages::{PendingStartMessage, PendingStopMessage, Schedule, StartReason, StopReason};
use crate::state::{CrashCount, InstanceHeartbeat};

/// Priority reserved for replacing evacuating instances; above any computed priority.
pub const EVACUATION_PRIORITY: f64 = 2.0;

/// Analyzer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Delay unit for stops and crash restarts, and the keep-alive of sent records.
    pub grace_period_secs: u64,

    pub backoff: CrashBackoff,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: crate::DEFAULT_GRACE_PERIOD_SECS,
            backoff: CrashBackoff::default(),
        }
    }
}

/// What one app's analysis decided to queue.
#[derive(Debug, Clone, Default)]
pub struct AppAnalysis {
    pub starts: Vec<PendingStartMessage>,
    pub stops: Vec<PendingStopMessage>,
    pub crash_counts: Vec<CrashCount>,
}

impl AppAnalysis {
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty() && self.stops.is_empty() && self.crash_counts.is_empty()
    }
}

/// Decides the corrective actions for one application-version.
pub struct AppAnalyzer<'a> {
    app: &'a App,
    config: &'a AnalyzerConfig,
    existing_starts: &'a BTreeMap<String, PendingStartMessage>,
    existing_stops: &'a BTreeMap<String, PendingStopMessage>,
    now: DateTime<Utc>,

    queued_starts: BTreeSet<String>,
    queued_stops: BTreeSet<String>,
    analysis: AppAnalysis,
}

impl<'a> AppAnalyzer<'a> {
    pub fn new(
        app: &'a App,
        config: &'a AnalyzerConfig,
        existing_starts: &'a BTreeMap<String, PendingStartMessage>,
        existing_stops: &'a BTreeMap<String, PendingStopMessage>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            app,
            config,
            existing_starts,
            existing_stops,
            now,
            queued_starts: BTreeSet::new(),
            queued_stops: BTreeSet::new(),
            analysis: AppAnalysis::default(),
        }
    }

    /// Run every scan and return what was queued.
    pub fn analyze(mut self) -> AppAnalysis {
        let priority = self.start_priority();

        self.queue_missing(priority);
        self.queue_crashed(priority);
        self.queue_evacuating();

        // Starting takes precedence over stopping within one pass.
        if self.analysis.starts.is_empty() {
            self.queue_extra();
            self.queue_duplicates();
        }

        self.analysis
    }

    /// Share of desired indices not covered by a starting or running instance.
    fn start_priority(&self) -> f64 {
        let desired = self.app.number_of_desired_instances();
        if desired == 0 {
            return 0.0;
        }
        let covered = self.app.number_of_desired_indices_with_starting_or_running();
        f64::from(desired.saturating_sub(covered)) / f64::from(desired)
    }

    fn queue_missing(&mut self, priority: f64) {
        if !self.app.is_staged() {
            return;
        }

        for index in 0..self.app.number_of_desired_instances() {
            if self.app.has_starting_or_running_at_index(index)
                || self.app.has_crashed_at_index(index)
                || self.app.has_evacuating_at_index(index)
            {
                continue;
            }

            let start = self.start(index, Schedule::immediate(), priority, StartReason::Missing);
            self.queue_start(start, "missing instance");
        }
    }

    fn queue_crashed(&mut self, priority: f64) {
        if !self.app.is_staged() {
            return;
        }

        let any_alive = self.app.has_starting_or_running_instances();

        for index in 0..self.app.number_of_desired_instances() {
            if !self.app.has_crashed_at_index(index) || self.app.has_starting_or_running_at_index(index) {
                continue;
            }

            // A fully crashed app is revived through index 0 alone.
            if index != 0 && !any_alive {
                continue;
            }

            let mut crash_count = self.app.crash_count_at_index(index, self.now);
            let delay = self.config.backoff.delay_for(crash_count.crash_count);
            let schedule = Schedule::after(delay, self.config.grace_period_secs);
            let start = self.start(index, schedule, priority, StartReason::Crashed);

            if self.queue_start(start, "crashed instance") {
                crash_count.crash_count = crash_count.crash_count.saturating_add(1);
                self.analysis.crash_counts.push(crash_count);
            }
        }
    }

    fn queue_evacuating(&mut self) {
        let app = self.app;

        for index in app.reported_indices() {
            let evacuating = app.evacuating_at_index(index);
            if evacuating.is_empty() {
                continue;
            }

            if !self.app.is_index_desired(index) {
                self.queue_evacuation_stops(&evacuating, StopReason::Extra, "undesired evacuating instance");
                continue;
            }

            if !self.app.is_staged() {
                self.queue_evacuation_stops(
                    &evacuating,
                    StopReason::EvacuationComplete,
                    "evacuating instance of unstaged app",
                );
            }

            if self.app.has_running_at_index(index) {
                self.queue_evacuation_stops(
                    &evacuating,
                    StopReason::EvacuationComplete,
                    "evacuating instance replaced elsewhere",
                );
                continue;
            }

            if self.app.has_starting_at_index(index) {
                continue;
            }

            let schedule = Schedule::after(0, self.config.grace_period_secs);
            let start = self.start(index, schedule, EVACUATION_PRIORITY, StartReason::Evacuating);
            self.queue_start(start, "evacuating instance");

            let crash_count = self.app.crash_count_at_index(index, self.now);
            if crash_count.crash_count >= self.config.backoff.crashes_before_backoff {
                self.queue_evacuation_stops(
                    &evacuating,
                    StopReason::EvacuationComplete,
                    "unstable evacuating instance",
                );
            }
        }
    }

    fn queue_evacuation_stops(&mut self, evacuating: &[&InstanceHeartbeat], reason: StopReason, why: &str) {
        let schedule = Schedule::after(0, self.config.grace_period_secs);
        for heartbeat in evacuating {
            let stop = self.stop(heartbeat, schedule, reason);
            self.queue_stop(stop, heartbeat.instance_index, why);
        }
    }

    fn queue_extra(&mut self) {
        let app = self.app;
        let schedule = Schedule::after(0, self.config.grace_period_secs);
        for heartbeat in app.extra_instances() {
            let stop = self.stop(heartbeat, schedule, StopReason::Extra);
            self.queue_stop(stop, heartbeat.instance_index, "extra instance");
        }
    }

    /// Stops every instance at a duplicated index, staggered one grace period
    /// apart. The sender re-checks each one, so at least one survives.
    fn queue_duplicates(&mut self) {
        let app = self.app;
        let grace = self.config.grace_period_secs;

        for index in 0..app.number_of_desired_instances() {
            let instances = app.starting_or_running_at_index(index);
            if instances.len() < 2 {
                continue;
            }

            for (position, heartbeat) in (1u64..).zip(instances) {
                let schedule = Schedule::after(position.saturating_mul(grace), grace);
                let stop = self.stop(heartbeat, schedule, StopReason::Duplicate);
                self.queue_stop(stop, index, "duplicate instance");
            }
        }
    }

    fn start(&self, index: u32, schedule: Schedule, priority: f64, reason: StartReason) -> PendingStartMessage {
        PendingStartMessage::new(
            self.now,
            schedule,
            self.app.app_guid().clone(),
            self.app.app_version().clone(),
            index,
            priority,
            reason,
        )
    }

    fn stop(&self, heartbeat: &InstanceHeartbeat, schedule: Schedule, reason: StopReason) -> PendingStopMessage {
        PendingStopMessage::new(
            self.now,
            schedule,
            self.app.app_guid().clone(),
            self.app.app_version().clone(),
            heartbeat.instance_guid.clone(),
            reason,
        )
    }

    /// Queue `start` unless its key is already pending or queued this pass.
    fn queue_start(&mut self, start: PendingStartMessage, why: &str) -> bool {
        let key = start.store_key();

        if let Some(existing) = self.existing_starts.get(&key) {
            info!(
                app_guid = %start.message.app_guid,
                app_version = %start.message.app_version,
                index = start.instance_index,
                message_id = %existing.message.message_id,
                reason = %existing.reason,
                "Skipping already enqueued start: {}", why
            );
            return false;
        }

        if !self.queued_starts.insert(key) {
            return false;
        }

        info!(
            app_guid = %start.message.app_guid,
            app_version = %start.message.app_version,
            index = start.instance_index,
            message_id = %start.message.message_id,
            reason = %start.reason,
            priority = start.priority,
            send_on = %start.message.send_on,
            desired_instances = self.app.number_of_desired_instances(),
            "Enqueuing start: {}", why
        );
        self.analysis.starts.push(start);
        true
    }

    fn queue_stop(&mut self, stop: PendingStopMessage, index: u32, why: &str) -> bool {
        let key = stop.store_key();

        if let Some(existing) = self.existing_stops.get(&key) {
            info!(
                app_guid = %stop.message.app_guid,
                app_version = %stop.message.app_version,
                instance_guid = %stop.instance_guid,
                message_id = %existing.message.message_id,
                reason = %existing.reason,
                "Skipping already enqueued stop: {}", why
            );
            return false;
        }

        if !self.queued_stops.insert(key) {
            return false;
        }

        info!(
            app_guid = %stop.message.app_guid,
            app_version = %stop.message.app_version,
            instance_guid = %stop.instance_guid,
            index,
            message_id = %stop.message.message_id,
            reason = %stop.reason,
            send_on = %stop.message.send_on,
            desired_instances = self.app.number_of_desired_instances(),
            "Enqueuing stop: {}", why
        );
        self.analysis.stops.push(stop);
        true
    }
}
