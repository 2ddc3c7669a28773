use msk_ledger::{InsufficientStock, StockKey, ValidationError};
use thiserror::Error;

/// Failure of a storage backend behind [`crate::MovementStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A concurrent writer got there first (stale level, serialization
    /// failure, lock timeout in the backend).
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Every way a submission can fail.  Nothing is retained on any of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),
    #[error("concurrency conflict on {key}")]
    ConcurrencyConflict { key: String },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl EngineError {
    /// `true` when submitting the same draft again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrencyConflict { .. } | EngineError::PersistenceFailure(_)
        )
    }

    pub(crate) fn lock_timeout(key: &StockKey) -> Self {
        EngineError::ConcurrencyConflict {
            key: key.to_string(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(key) => EngineError::ConcurrencyConflict { key },
            StoreError::Backend(msg) => EngineError::PersistenceFailure(msg),
        }
    }
}
