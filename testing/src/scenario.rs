//! Scenario builders for poll-worker diff-logic tests.

use serde_json::json;
use tablewatch_core::domain::{slot_id, NormalizedSlot};

/// Builds a [`NormalizedSlot`] for `provider`/`venue_id` at `actual_time`,
/// with a one-element `availability_times` payload matching what a real
/// adapter produces.
#[must_use]
pub fn slot(provider: &str, venue_id: &str, venue_name: &str, actual_time: &str) -> NormalizedSlot {
    NormalizedSlot {
        slot_id: slot_id(provider, venue_id, actual_time),
        venue_id: venue_id.to_string(),
        venue_name: venue_name.to_string(),
        payload: json!({
            "availability_times": [actual_time],
            "book_url": format!("https://example.test/{provider}/{venue_id}"),
        }),
    }
}

/// Fluent builder for a batch of slots sharing one provider, used to stand
/// up `curr`/`prev` sets in poll-worker scenario tests.
#[derive(Debug, Default)]
pub struct SlotBuilder {
    provider: String,
    slots: Vec<NormalizedSlot>,
}

impl SlotBuilder {
    /// Starts a batch for `provider`.
    #[must_use]
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            slots: Vec::new(),
        }
    }

    /// Adds one slot to the batch.
    #[must_use]
    pub fn with(mut self, venue_id: &str, venue_name: &str, actual_time: &str) -> Self {
        self.slots.push(slot(&self.provider, venue_id, venue_name, actual_time));
        self
    }

    /// Consumes the builder, returning the accumulated slots.
    #[must_use]
    pub fn build(self) -> Vec<NormalizedSlot> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_slots_for_one_provider() {
        let slots = SlotBuilder::new("resy")
            .with("venue-1", "Le Bernardin", "2026-02-14T20:30:00Z")
            .with("venue-2", "Rezdora", "2026-02-14T20:45:00Z")
            .build();
        assert_eq!(slots.len(), 2);
        assert_ne!(slots[0].slot_id, slots[1].slot_id);
    }

    #[test]
    fn slot_id_is_stable_for_identical_inputs() {
        let a = slot("resy", "venue-1", "Le Bernardin", "2026-02-14T20:30:00Z");
        let b = slot("resy", "venue-1", "Le Bernardin", "2026-02-14T20:30:00Z");
        assert_eq!(a.slot_id, b.slot_id);
    }
}
