//! Health manager background worker.
//!
//! Runs the analyze and send passes on their own periodic intervals.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::analyzer::Analyzer;
use crate::error::EngineError;
use crate::sender::Sender;

/// Worker that drives the control loop.
pub struct HealthWorker {
    analyzer: Analyzer,
    sender: Sender,
    analyzer_interval: Duration,
    sender_interval: Duration,
}

impl HealthWorker {
    pub fn new(
        analyzer: Analyzer,
        sender: Sender,
        analyzer_interval: Duration,
        sender_interval: Duration,
    ) -> Self {
        Self {
            analyzer,
            sender,
            analyzer_interval,
            sender_interval,
        }
    }

    /// Run until shutdown is signaled. Failed passes are logged and retried
    /// on the next tick.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            analyzer_interval_secs = self.analyzer_interval.as_secs(),
            sender_interval_secs = self.sender_interval.as_secs(),
            "Starting health worker"
        );

        let mut analyze_tick = tokio::time::interval(self.analyzer_interval);
        let mut send_tick = tokio::time::interval(self.sender_interval);
        // Don't immediately tick on startup - wait for first interval
        analyze_tick.tick().await;
        send_tick.tick().await;

        loop {
            tokio::select! {
                _ = analyze_tick.tick() => {
                    if let Err(e) = self.analyzer.analyze(Utc::now()).await {
                        log_pass_failure("analyze", &e);
                    }
                }
                _ = send_tick.tick() => {
                    if let Err(e) = self.sender.send(Utc::now()).await {
                        log_pass_failure("send", &e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn log_pass_failure(pass: &str, e: &EngineError) {
    if e.is_not_fresh() {
        warn!(pass, error = %e, "Skipping pass, store is not fresh");
    } else {
        error!(pass, error = %e, "Pass failed");
    }
}
