//! Provider-adapter error type.

use thiserror::Error;

/// Errors a provider adapter can report back to the poll worker.
///
/// Deliberately distinct from "the provider returned zero results": a
/// transport failure must abort the poll before closures are computed,
/// while a legitimate empty response is a valid, closure-eligible outcome.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (connect error, timeout, TLS).
    #[error("{provider_id}: transport failure: {message}")]
    Request {
        /// Provider id the request was made against.
        provider_id: String,
        /// Underlying transport error message.
        message: String,
    },

    /// The provider responded but with a non-2xx status.
    #[error("{provider_id} responded {status}")]
    Status {
        /// Provider id that produced the response.
        provider_id: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be parsed into the expected shape.
    #[error("{provider_id}: failed to parse response: {reason}")]
    Parse {
        /// Provider id that produced the response.
        provider_id: String,
        /// Parse failure detail.
        reason: String,
    },

    /// No adapter is registered under the requested provider id.
    #[error("no provider registered under id {0:?}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// The provider id this error occurred against, if any.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::Request { provider_id, .. }
            | Self::Status { provider_id, .. }
            | Self::Parse { provider_id, .. } => Some(provider_id),
            Self::UnknownProvider(_) => None,
        }
    }
}
