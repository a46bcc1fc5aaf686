// ============================================================================
// Lifecycle Error Taxonomy
// ============================================================================

use crate::cache::CacheError;
use crate::store::StoreError;

/// Typed outcome of every `OrderLifecycle` operation.
///
/// Transport-layer mapping to protocol status codes happens outside the core;
/// the core only distinguishes these four categories. Malformed cursors and
/// malformed version preconditions are classified as `Conflict`, matching the
/// historical behavior of the service.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("Order not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl LifecycleError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<CacheError> for LifecycleError {
    fn from(err: CacheError) -> Self {
        Self::Internal(err.into())
    }
}
