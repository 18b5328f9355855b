//! Error taxonomy shared at crate boundaries.
//!
//! Each crate narrows this down further (`ProviderError`, `StoreError`,
//! `NotifyError`) but the poll worker and scheduler operate in terms of
//! [`DiscoveryError`], matching the error-kind taxonomy in the design notes:
//! transport, lock contention, DB transient, invariant violation, transport
//! fatal, and retention failure.

use thiserror::Error;

/// Result alias for engine-level operations.
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Top-level error taxonomy for the discovery engine.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The provider adapter could not complete the fetch (timeout, 5xx,
    /// malformed response). Distinct from "fetched zero results" by design:
    /// a transport error must abort the poll before closures are computed.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Another worker holds the per-bucket advisory lock; skip this tick.
    #[error("bucket {0} is locked by another worker")]
    LockContention(String),

    /// A transient database failure (serialization failure, deadlock,
    /// connection drop). The caller should roll back and let the scheduler
    /// re-enqueue after cooldown.
    #[error("database error: {0}")]
    Database(String),

    /// A computed drop violated an invariant (e.g. the slot was already in
    /// the stored baseline set). Logged at error severity; the poll still
    /// completes.
    #[error("invariant violation in bucket {bucket_id}: {detail}")]
    InvariantViolation {
        /// Bucket the violation was observed in.
        bucket_id: String,
        /// Description of what invariant failed.
        detail: String,
    },

    /// Configuration failed validation at startup.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Serialization/deserialization of a JSON payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DiscoveryError {
    /// Returns `true` for errors that the scheduler should treat as
    /// retryable after the standard cooldown rather than surfacing to an
    /// operator.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::LockContention(_) | Self::Database(_)
        )
    }
}
