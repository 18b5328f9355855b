//! In-memory provider adapter for deterministic engine tests.

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tablewatch_core::domain::NormalizedSlot;

/// Key identifying one scripted response: `(date_str, time_slot)`.
type BucketKey = (String, String);

/// A provider adapter whose responses are scripted ahead of time, used by
/// `engine` and `notify` unit tests to drive the poll worker and scheduler
/// without a network dependency.
pub struct FakeProviderAdapter {
    provider_id: String,
    responses: Mutex<BTreeMap<BucketKey, Result<Vec<NormalizedSlot>, FakeFailure>>>,
}

/// A scripted failure mode for [`FakeProviderAdapter`].
#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
    /// Simulates a transport-level failure (timeout, connection reset).
    Transport,
    /// Simulates a non-2xx HTTP status.
    Status(u16),
}

impl FakeProviderAdapter {
    /// Builds an empty fake registered under `provider_id`; every bucket
    /// not explicitly scripted returns an empty, successful result.
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            responses: Mutex::new(BTreeMap::new()),
        }
    }

    /// Scripts a successful response for `(date_str, time_slot)`.
    pub fn set_slots(&self, date_str: &str, time_slot: &str, slots: Vec<NormalizedSlot>) {
        self.responses
            .lock()
            .expect("fake provider mutex poisoned")
            .insert((date_str.to_string(), time_slot.to_string()), Ok(slots));
    }

    /// Scripts a failure for `(date_str, time_slot)`.
    pub fn set_failure(&self, date_str: &str, time_slot: &str, failure: FakeFailure) {
        self.responses
            .lock()
            .expect("fake provider mutex poisoned")
            .insert(
                (date_str.to_string(), time_slot.to_string()),
                Err(failure),
            );
    }
}

#[async_trait]
impl ProviderAdapter for FakeProviderAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn search_availability(
        &self,
        date_str: &str,
        time_slot: &str,
        _party_sizes: &[u32],
    ) -> Result<Vec<NormalizedSlot>, ProviderError> {
        let key = (date_str.to_string(), time_slot.to_string());
        match self
            .responses
            .lock()
            .expect("fake provider mutex poisoned")
            .get(&key)
        {
            None => Ok(Vec::new()),
            Some(Ok(slots)) => Ok(slots.clone()),
            Some(Err(FakeFailure::Transport)) => Err(ProviderError::Request {
                provider_id: self.provider_id.clone(),
                message: "simulated transport failure".to_string(),
            }),
            Some(Err(FakeFailure::Status(status))) => Err(ProviderError::Status {
                provider_id: self.provider_id.clone(),
                status: *status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unscripted_bucket_returns_empty_success() {
        let fake = FakeProviderAdapter::new("resy");
        let result = fake.search_availability("2026-02-14", "20:30", &[2]).await;
        assert_eq!(result.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn scripted_failure_is_distinguishable_from_empty() {
        let fake = FakeProviderAdapter::new("resy");
        fake.set_failure("2026-02-14", "20:30", FakeFailure::Transport);
        let result = fake.search_availability("2026-02-14", "20:30", &[2]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn scripted_slots_are_returned_verbatim() {
        let fake = FakeProviderAdapter::new("resy");
        let slot = NormalizedSlot {
            slot_id: "abc".to_string(),
            venue_id: "v1".to_string(),
            venue_name: "Test Venue".to_string(),
            payload: json!({"availability_times": ["20:30"]}),
        };
        fake.set_slots("2026-02-14", "20:30", vec![slot.clone()]);
        let result = fake
            .search_availability("2026-02-14", "20:30", &[2])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].slot_id, slot.slot_id);
    }
}
