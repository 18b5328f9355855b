//! # Tablewatch Providers
//!
//! Provider Adapter implementations: the normalization boundary between a
//! booking provider's wire format and the engine's canonical
//! [`NormalizedSlot`](tablewatch_core::domain::NormalizedSlot) contract.
//!
//! Adapters are pure with respect to the database — no persistence, no
//! side effects beyond the outbound HTTP call — and MUST distinguish a
//! transport failure from a legitimate empty result so the poll worker
//! never computes closures against a set that's empty only because the
//! provider was unreachable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod error;
pub mod fake;
pub mod http;

pub use adapter::{find_provider, ProviderAdapter};
pub use error::ProviderError;
pub use fake::{FakeFailure, FakeProviderAdapter};
pub use http::HttpProviderAdapter;
