//! Error types for notification fan-out.

use thiserror::Error;

/// Errors surfaced by the notification crate.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The underlying store returned an error.
    #[error("store error: {0}")]
    Store(#[from] tablewatch_store::StoreError),

    /// An email transport failed to send.
    #[error("email transport error: {0}")]
    Email(String),

    /// A push transport failed to send.
    #[error("push transport error: {0}")]
    Push(String),
}
