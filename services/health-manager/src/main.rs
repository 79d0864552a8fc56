//! Health manager
//!
//! Reconciles the desired instances of every application against the
//! instances reported by worker-node heartbeats, and publishes start and
//! stop commands to close the gap.

use std::sync::Arc;

use anyhow::Result;
use hm_health_manager::{
    config,
    store::InMemoryStore,
    transport::MockPublisher,
    Analyzer, HealthWorker, Sender,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HM_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting health manager");
    info!(
        grace_period_secs = config.analyzer.grace_period_secs,
        message_limit = config.sender.message_limit,
        start_subject = %config.sender.start_subject,
        stop_subject = %config.sender.stop_subject,
        "Configuration loaded"
    );

    // Development wiring: in-memory store and mock bus. Nothing feeds or
    // bumps this store, so every pass reports it as not fresh.
    let store = Arc::new(InMemoryStore::new(config.store));
    let publisher = Arc::new(MockPublisher::new());
    warn!("Using in-memory store and mock publisher; no desired-state or heartbeat feed is wired, so passes will report the store as not fresh");

    let worker = HealthWorker::new(
        Analyzer::new(store.clone(), config.analyzer),
        Sender::new(store, publisher, config.sender.clone()),
        config.analyzer_interval,
        config.sender_interval,
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Health worker did not shut down in time");
    }

    info!("Health manager shutdown complete");
    Ok(())
}
