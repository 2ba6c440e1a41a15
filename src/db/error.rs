//! Storage error types

use thiserror::Error;

/// Errors surfaced by the storage layer.
///
/// Every repository operation rejects with one of these; nothing is retried
/// or swallowed below the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened or upgraded. The caller has to retry
    /// the whole open sequence.
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// A record referenced by id no longer exists.
    #[error("{store} record {id} not found")]
    NotFound { store: &'static str, id: i64 },

    /// The engine refused the operation (invalid transaction scope, write in a
    /// read-only transaction, failed statement).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(store: &'static str, id: i64) -> Self {
        StoreError::NotFound { store, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Reclassify an engine failure that happened while opening or upgrading.
    pub(crate) fn into_connection(self) -> Self {
        match self {
            StoreError::ConstraintViolation(msg) => StoreError::Connection(msg),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::ConstraintViolation(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
