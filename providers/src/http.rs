//! Generic JSON/HTTP provider adapter.
//!
//! Booking-provider wire protocols (Resy's actual API, OpenTable's actual
//! API) are explicitly out of scope; this adapter implements the *shape*
//! every registered provider is expected to conform to — a single GET
//! returning a JSON array of availability entries — so a real provider
//! integration is a matter of pointing `base_url` at the right endpoint and
//! mapping its response into this shape upstream of us.

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;
use tablewatch_core::domain::{slot_id, NormalizedSlot};

/// Provider HTTP calls must complete within this bound; a worker whose call
/// times out returns with no DB changes and the scheduler re-enqueues the
/// bucket after cooldown.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// One entry in the generic provider's JSON response.
#[derive(Debug, serde::Deserialize)]
struct RawEntry {
    venue_id: String,
    venue_name: String,
    #[serde(default)]
    availability_times: Vec<String>,
    #[serde(default)]
    party_sizes_available: Vec<u32>,
    book_url: Option<String>,
    neighborhood: Option<String>,
    price_range: Option<String>,
}

/// A thin adapter for any provider exposing the generic availability shape
/// over HTTP, parameterized by `provider_id` and `base_url` so the same code
/// backs every registered provider (`"resy"`, `"opentable"`, ...).
pub struct HttpProviderAdapter {
    provider_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpProviderAdapter {
    /// Builds an adapter for `provider_id`, issuing requests against
    /// `base_url`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying `reqwest` client fails to build, which only
    /// happens under a misconfigured TLS backend.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn search_availability(
        &self,
        date_str: &str,
        time_slot: &str,
        party_sizes: &[u32],
    ) -> Result<Vec<NormalizedSlot>, ProviderError> {
        let party_sizes_csv = party_sizes
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("date", date_str),
                ("time", time_slot),
                ("party_sizes", &party_sizes_csv),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider_id: self.provider_id.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider_id: self.provider_id.clone(),
                status: response.status().as_u16(),
            });
        }

        let entries: Vec<RawEntry> =
            response.json().await.map_err(|e| ProviderError::Parse {
                provider_id: self.provider_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .map(|entry| self.to_normalized(entry, date_str, time_slot))
            .collect())
    }
}

impl HttpProviderAdapter {
    fn to_normalized(&self, entry: RawEntry, date_str: &str, time_slot: &str) -> NormalizedSlot {
        let actual_time = format!("{date_str}T{time_slot}:00Z");
        let id = slot_id(&self.provider_id, &entry.venue_id, &actual_time);

        let mut payload = serde_json::json!({
            "availability_times": entry.availability_times,
            "party_sizes_available": entry.party_sizes_available,
        });
        if let Some(url) = entry.book_url {
            payload["book_url"] = serde_json::Value::String(url);
        }
        if let Some(n) = entry.neighborhood {
            payload["neighborhood"] = serde_json::Value::String(n);
        }
        if let Some(p) = entry.price_range {
            payload["price_range"] = serde_json::Value::String(p);
        }

        NormalizedSlot {
            slot_id: id,
            venue_id: entry.venue_id,
            venue_name: entry.venue_name,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_is_preserved() {
        let adapter = HttpProviderAdapter::new("resy", "https://example.invalid/search");
        assert_eq!(adapter.provider_id(), "resy");
    }
}
