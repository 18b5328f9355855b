//! Store-level error type.

use thiserror::Error;

/// Errors raised by any `tablewatch-store` operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database operation failed (connection, constraint, serialization
    /// failure). Callers at the engine layer treat this as retryable.
    #[error("database error: {0}")]
    Database(String),

    /// A JSON column failed to (de)serialize into its typed representation.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for tablewatch_core::error::DiscoveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => Self::Database(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}
