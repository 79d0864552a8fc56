//! Reconciliation pass.
//!
//! Loads the current snapshot, runs [`AppAnalyzer`] over every
//! application-version and persists what it queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hm_reconcile::{AnalyzerConfig, AppAnalyzer};
use tracing::{error, info, instrument};

use crate::error::EngineError;
use crate::store::Store;

/// Counts from one analyze pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub apps_analyzed: usize,
    pub starts_enqueued: usize,
    pub stops_enqueued: usize,
    pub crash_counts_incremented: usize,
}

/// Runs reconciliation passes against a store.
pub struct Analyzer {
    store: Arc<dyn Store>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>, config: AnalyzerConfig) -> Self {
        Self { store, config }
    }

    /// Run one pass at `now`.
    ///
    /// Aborts without touching the store if the snapshot is stale. Crash
    /// counts are written first, then starts, then stops; the first failed
    /// write ends the pass.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn analyze(&self, now: DateTime<Utc>) -> Result<AnalysisSummary, EngineError> {
        self.store.verify_freshness(now).await?;

        let apps = self.store.get_apps(now).await?;
        let existing_starts = self.store.get_pending_start_messages().await?;
        let existing_stops = self.store.get_pending_stop_messages().await?;

        let mut starts = Vec::new();
        let mut stops = Vec::new();
        let mut crash_counts = Vec::new();

        for app in apps.values() {
            let analysis =
                AppAnalyzer::new(app, &self.config, &existing_starts, &existing_stops, now)
                    .analyze();
            starts.extend(analysis.starts);
            stops.extend(analysis.stops);
            crash_counts.extend(analysis.crash_counts);
        }

        if let Err(e) = self.store.save_crash_counts(&crash_counts, now).await {
            error!(error = %e, count = crash_counts.len(), "Failed to save crash counts");
            return Err(e.into());
        }

        if let Err(e) = self.store.save_pending_start_messages(&starts).await {
            error!(error = %e, count = starts.len(), "Failed to save pending start messages");
            return Err(e.into());
        }

        if let Err(e) = self.store.save_pending_stop_messages(&stops).await {
            error!(error = %e, count = stops.len(), "Failed to save pending stop messages");
            return Err(e.into());
        }

        let summary = AnalysisSummary {
            apps_analyzed: apps.len(),
            starts_enqueued: starts.len(),
            stops_enqueued: stops.len(),
            crash_counts_incremented: crash_counts.len(),
        };

        info!(
            apps_analyzed = summary.apps_analyzed,
            starts_enqueued = summary.starts_enqueued,
            stops_enqueued = summary.stops_enqueued,
            crash_counts_incremented = summary.crash_counts_incremented,
            "Analysis complete"
        );

        Ok(summary)
    }
}
