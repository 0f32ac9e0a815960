//! Error types for subscriber storage and caching

use quake_model::SubscriberId;
use std::sync::Arc;

/// Persistent store failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No such subscriber
    #[error("subscriber not found: {0}")]
    NotFound(SubscriberId),

    /// Insert of an existing id
    #[error("subscriber already exists: {0}")]
    AlreadyExists(SubscriberId),

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Query executed but failed
    #[error("query failed: {0}")]
    Query(String),
}

/// Cache layer failures
///
/// Population errors are shared between every caller waiting on the same
/// key, hence the `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Backing store failed
    #[error("subscriber store failed: {0}")]
    Store(Arc<StoreError>),

    /// Write targeted a subscriber that does not exist
    #[error("subscriber not found: {0}")]
    NotFound(SubscriberId),
}

impl CacheError {
    /// Check if the failure is the store being unreachable
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(e) if matches!(**e, StoreError::Unavailable(_)))
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(Arc::new(other)),
        }
    }
}

impl From<Arc<StoreError>> for CacheError {
    fn from(error: Arc<StoreError>) -> Self {
        Self::Store(error)
    }
}

/// Result alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
