//! Errors returned by a reconciliation or dispatch pass.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Pass errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The snapshot is stale; the pass did nothing.
    #[error("store is not fresh: {0}")]
    NotFresh(#[source] StoreError),

    /// A store read or write failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// Publishing a command failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl EngineError {
    pub fn is_not_fresh(&self) -> bool {
        matches!(self, Self::NotFresh(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        if err.is_freshness() {
            Self::NotFresh(err)
        } else {
            Self::Store(err)
        }
    }
}
