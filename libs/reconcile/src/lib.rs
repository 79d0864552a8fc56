//! Reconciliation decisions for the health manager.
//!
//! This library holds the pure half of the control loop: given one
//! application-version's desired state, its heartbeats and its crash
//! history, decide which corrective start/stop records should be queued.
//! Nothing in here performs I/O; the service crate loads snapshots from the
//! store, feeds them through [`AppAnalyzer`] and persists the result.
//!
//! - **Desired state**: what the controller says should run.
//! - **Actual state**: what worker-node heartbeats say is running.
//! - **Pending records**: start/stop actions waiting for the sender.
//!
//! # Invariants
//!
//! - At most one pending record per key; existing records are never
//!   overwritten by a later pass.
//! - Decisions depend only on their inputs and the supplied `now`.

pub mod analyzer;
pub mod app;
pub mod backoff;
pub mod messages;
pub mod state;

pub use analyzer::{AnalyzerConfig, AppAnalysis, AppAnalyzer, EVACUATION_PRIORITY};
pub use app::{App, AppKey};
pub use backoff::{compute_crash_delay, CrashBackoff};
pub use messages::{
    PendingMessage, PendingStartMessage, PendingStopMessage, Schedule, StartMessage,
    StartReason, StopMessage, StopReason,
};
pub use state::{AppState, CrashCount, DesiredAppState, InstanceHeartbeat, InstanceState, PackageState};

/// Default grace period in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Default number of crashes tolerated before restarts are delayed.
pub const DEFAULT_CRASHES_BEFORE_BACKOFF: u32 = 3;

/// Default first backoff delay in seconds.
pub const DEFAULT_STARTING_BACKOFF_DELAY_SECS: u64 = 30;

/// Default backoff ceiling in seconds (16 minutes).
pub const DEFAULT_MAXIMUM_BACKOFF_DELAY_SECS: u64 = 960;
