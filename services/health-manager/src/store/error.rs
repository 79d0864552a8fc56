//! Store error types.

use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Desired state has not been refreshed within its TTL.
    #[error("desired state is not fresh")]
    DesiredNotFresh,

    /// Heartbeats have not been refreshed within their TTL.
    #[error("actual state is not fresh")]
    ActualNotFresh,

    /// Neither desired nor actual state is fresh.
    #[error("desired and actual state are not fresh")]
    BothNotFresh,

    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Freshness errors are an expected steady-state condition, not a failure.
    pub fn is_freshness(&self) -> bool {
        matches!(
            self,
            Self::DesiredNotFresh | Self::ActualNotFresh | Self::BothNotFresh
        )
    }

    /// Map the two freshness flags to an error, if either is stale.
    pub fn from_freshness(desired_fresh: bool, actual_fresh: bool) -> Option<Self> {
        match (desired_fresh, actual_fresh) {
            (true, true) => None,
            (false, true) => Some(Self::DesiredNotFresh),
            (true, false) => Some(Self::ActualNotFresh),
            (false, false) => Some(Self::BothNotFresh),
        }
    }
}
