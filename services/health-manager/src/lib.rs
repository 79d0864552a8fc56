//! Health manager library.
//!
//! This crate primarily ships a `health-manager` binary, but we expose the
//! passes, ports and development adapters to enable integration testing.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod sender;
pub mod store;
pub mod transport;
pub mod worker;

pub use analyzer::{AnalysisSummary, Analyzer};
pub use error::EngineError;
pub use sender::{SendSummary, Sender, SenderConfig};
pub use worker::HealthWorker;
