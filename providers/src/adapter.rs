//! The Provider Adapter contract (component A).
//!
//! An adapter normalizes one booking provider's availability response into
//! the engine's canonical [`NormalizedSlot`] shape. Adapters are pure with
//! respect to the database: no persistence, no side effects beyond the
//! outbound HTTP call itself.

use crate::error::ProviderError;
use async_trait::async_trait;
use tablewatch_core::domain::NormalizedSlot;

/// One provider's availability search, for one `(date, anchor time)` bucket
/// crossed with the configured party sizes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The string id this adapter is registered under (`"resy"`,
    /// `"opentable"`, ...). Must match the `provider_id` baked into every
    /// [`NormalizedSlot::slot_id`](tablewatch_core::domain::slot_id) it returns.
    fn provider_id(&self) -> &str;

    /// Searches availability for one bucket across every requested party
    /// size, returning the normalized union.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] for transport failures (timeout, non-2xx,
    /// malformed body). Callers MUST treat this as distinct from "legitimate
    /// zero results" and abort the poll rather than compute closures against
    /// an empty set.
    async fn search_availability(
        &self,
        date_str: &str,
        time_slot: &str,
        party_sizes: &[u32],
    ) -> Result<Vec<NormalizedSlot>, ProviderError>;
}

/// Looks up a provider by id in a registered set, normalizing the "unknown
/// provider" case the engine hits if a bucket references a provider id with
/// no corresponding adapter configured.
#[must_use]
pub fn find_provider<'a>(
    providers: &'a [Box<dyn ProviderAdapter>],
    provider_id: &str,
) -> Option<&'a dyn ProviderAdapter> {
    providers
        .iter()
        .find(|p| p.provider_id() == provider_id)
        .map(std::convert::AsRef::as_ref)
}
