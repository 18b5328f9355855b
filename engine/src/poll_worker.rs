//! Poll Worker (component C): the central state machine.
//!
//! One invocation polls exactly one bucket against one provider. Steps 1-2
//! are network I/O with no DB transaction open; steps 3-11 run inside one
//! transaction guarded by the bucket's advisory lock; step 12 (aggregation)
//! runs after commit so a slow aggregation never holds the lock.
//!
//! Non-responsibilities: the worker never decides *when* a bucket is polled
//! next (the scheduler owns cooldown/backoff) and never sends notifications
//! (the notify crate drains `drop_events` on its own timer).

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tablewatch_core::clock::Clock;
use tablewatch_core::domain::{BucketId, NormalizedSlot, SlotId};
use tablewatch_core::error::{DiscoveryError, DiscoveryResult};
use tablewatch_providers::ProviderAdapter;
use tablewatch_runtime::metrics::PollWorkerMetrics;
use tablewatch_runtime::retry::{retry_with_backoff, RetryPolicy};
use tablewatch_store::Stores;

/// Outcome of one poll worker invocation, returned to the scheduler for
/// logging/metrics; never used to decide the next dispatch.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Slots observed this poll.
    pub curr_count: usize,
    /// Drop events actually emitted (after the venue-zero and TTL filters).
    pub drops_emitted: usize,
    /// Slots transitioned to closed.
    pub closures: usize,
    /// Whether this poll bootstrapped the bucket (first observation).
    pub bootstrapped: bool,
}

/// Polls one bucket via one provider and applies the resulting diff.
pub struct PollWorker {
    stores: Arc<Stores>,
    clock: Arc<dyn Clock>,
    notified_dedupe: chrono::Duration,
    fetch_retry: RetryPolicy,
}

impl PollWorker {
    /// Builds a poll worker over the given stores and clock.
    #[must_use]
    pub fn new(stores: Arc<Stores>, clock: Arc<dyn Clock>, notified_dedupe: chrono::Duration) -> Self {
        Self {
            stores,
            clock,
            notified_dedupe,
            fetch_retry: RetryPolicy::builder().max_retries(2).build(),
        }
    }

    /// Runs one poll of `bucket_id` via `provider`, per the step ordering in
    /// the component design.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Transport`] if the provider fetch fails
    /// after retry, [`DiscoveryError::LockContention`] if another worker
    /// holds the bucket, or [`DiscoveryError::Database`] if a store
    /// operation fails. In every case the worker has made no partial writes
    /// — steps 3-11 are one transaction.
    pub async fn run_once(
        &self,
        provider: &dyn ProviderAdapter,
        bucket_id: &BucketId,
        date_str: &str,
        time_slot: &str,
        party_sizes: &[u32],
    ) -> DiscoveryResult<PollOutcome> {
        let started = std::time::Instant::now();
        let outcome = self
            .run_once_inner(provider, bucket_id, date_str, time_slot, party_sizes)
            .await;
        PollWorkerMetrics::record_tick(started.elapsed());
        outcome
    }

    async fn run_once_inner(
        &self,
        provider: &dyn ProviderAdapter,
        bucket_id: &BucketId,
        date_str: &str,
        time_slot: &str,
        party_sizes: &[u32],
    ) -> DiscoveryResult<PollOutcome> {
        let bid_owned = bucket_id.as_str();
        let bid: &str = &bid_owned;

        // Steps 1-2: network I/O, no transaction open yet.
        let fetched = retry_with_backoff(self.fetch_retry.clone(), || {
            provider.search_availability(date_str, time_slot, party_sizes)
        })
        .await
        .map_err(|e| {
            tracing::warn!(bucket_id = %bid, provider = provider.provider_id(), error = %e, "provider fetch failed, aborting tick");
            DiscoveryError::Transport(e.to_string())
        })?;

        let curr: BTreeMap<SlotId, NormalizedSlot> =
            fetched.into_iter().map(|s| (s.slot_id.clone(), s)).collect();
        let curr_set: BTreeSet<SlotId> = curr.keys().cloned().collect();
        let now = self.clock.now();

        // Step 3: acquire the per-bucket advisory lock as the first
        // statement of the transaction.
        let mut tx = tablewatch_store::advisory_lock::begin(&self.stores.pool)
            .await
            .map_err(|e| DiscoveryError::Database(e.to_string()))?;

        let acquired = tablewatch_store::advisory_lock::try_acquire_bucket_lock(&mut tx, bid)
            .await
            .map_err(|e| DiscoveryError::Database(e.to_string()))?;
        if !acquired {
            tx.rollback().await.ok();
            PollWorkerMetrics::record_lock_contention();
            tracing::debug!(bucket_id = %bid, "advisory lock contended, skipping tick");
            return Err(DiscoveryError::LockContention(bid.to_string()));
        }

        // Step 4: load the bucket row.
        let existing = self
            .stores
            .buckets
            .get_for_update(&mut tx, bid)
            .await?;

        let bootstrap_needed = match &existing {
            None => true,
            Some(b) => b.baseline_slot_ids.is_none(),
        };

        if bootstrap_needed {
            let sorted: Vec<String> = curr_set.iter().cloned().collect();
            self.stores
                .buckets
                .bootstrap(&mut tx, bid, date_str, time_slot, &sorted, now)
                .await?;

            let all_slots: Vec<&NormalizedSlot> = curr.values().collect();
            let run_id = uuid::Uuid::new_v4().to_string();
            self.stores
                .slots
                .upsert_open(&mut tx, bid, &all_slots, date_str, &run_id, now)
                .await?;
            self.stores
                .state
                .upsert_open(&mut tx, bid, &all_slots, date_str, now)
                .await?;

            tx.commit().await.map_err(|e| DiscoveryError::Database(e.to_string()))?;

            for slot in curr.values() {
                self.upsert_venue_seen(slot, now).await;
            }

            tracing::info!(bucket_id = %bid, slots = curr.len(), "bucket bootstrapped");
            return Ok(PollOutcome {
                curr_count: curr.len(),
                drops_emitted: 0,
                closures: 0,
                bootstrapped: true,
            });
        }

        let bucket = existing.expect("bootstrap_needed false implies a row exists");
        let prev_set: BTreeSet<String> = bucket
            .prev_slot_ids
            .unwrap_or_default()
            .into_iter()
            .collect();
        let baseline_set: BTreeSet<String> =
            bucket.baseline_slot_ids.unwrap_or_default().into_iter().collect();

        // Step 5: added, and the venue-zero criterion.
        let added: BTreeSet<SlotId> = curr_set.difference(&prev_set).cloned().collect();

        let prev_venue_ids = if added.is_empty() {
            BTreeSet::new()
        } else {
            self.stores.slots.open_venue_ids(&mut tx, bid).await?
        };

        let drops_venue_zero: Vec<&NormalizedSlot> = added
            .iter()
            .filter_map(|sid| curr.get(sid))
            .filter(|slot| !prev_venue_ids.contains(&slot.venue_id))
            .collect();

        // Step 6: TTL dedupe.
        let recently_notified = if drops_venue_zero.is_empty() {
            BTreeSet::new()
        } else {
            self.stores
                .drops
                .recently_notified(&mut tx, bid, now, self.notified_dedupe)
                .await?
        };
        let drops_to_emit: Vec<&NormalizedSlot> = drops_venue_zero
            .into_iter()
            .filter(|slot| !recently_notified.contains(&slot.slot_id))
            .collect();

        for slot in &drops_to_emit {
            if baseline_set.contains(&slot.slot_id) {
                tracing::error!(
                    bucket_id = %bid,
                    slot_id = %slot.slot_id,
                    "invariant violation: drop slot present in baseline set (baseline echo)"
                );
            }
        }

        // Step 7: projection writes for everything added.
        let added_slots: Vec<&NormalizedSlot> = added.iter().filter_map(|sid| curr.get(sid)).collect();
        let run_id = uuid::Uuid::new_v4().to_string();
        if !added_slots.is_empty() {
            self.stores
                .slots
                .upsert_open(&mut tx, bid, &added_slots, date_str, &run_id, now)
                .await?;
        }

        // Step 8: drop-event writes.
        let drops_inserted = if drops_to_emit.is_empty() {
            0
        } else {
            self.stores
                .drops
                .insert_drops(&mut tx, bid, &drops_to_emit, now)
                .await?
        };

        // Step 9: availability-state upsert.
        if !added_slots.is_empty() {
            self.stores
                .state
                .upsert_open(&mut tx, bid, &added_slots, date_str, now)
                .await?;
        }

        // Step 10: closure.
        let closed_slot_ids = self
            .stores
            .slots
            .close_missing(&mut tx, bid, &curr_set, &run_id, now)
            .await?;
        self.stores
            .drops
            .delete_closed_and_pushed(&mut tx, bid, &closed_slot_ids)
            .await?;
        let closed_states = self.stores.state.close(&mut tx, bid, &closed_slot_ids, now).await?;

        // Step 11: persist prev_slot_ids and scanned_at.
        let sorted_curr: Vec<String> = curr_set.iter().cloned().collect();
        self.stores
            .buckets
            .record_poll(&mut tx, bid, &sorted_curr, now)
            .await?;

        tx.commit().await.map_err(|e| DiscoveryError::Database(e.to_string()))?;

        for slot in curr.values() {
            self.upsert_venue_seen(slot, now).await;
        }
        for slot in &drops_to_emit {
            self.record_new_drop_metric(slot, now).await;
        }

        // Step 12: aggregation, outside the main transaction.
        self.aggregate_closures(&closed_states).await;

        PollWorkerMetrics::record_drops(drops_inserted as u64);
        PollWorkerMetrics::record_closures(closed_states.len() as u64);

        if !drops_to_emit.is_empty() || !closed_states.is_empty() {
            tracing::info!(
                bucket_id = %bid,
                drops = drops_inserted,
                closures = closed_states.len(),
                curr = curr.len(),
                "poll applied"
            );
        } else {
            tracing::debug!(bucket_id = %bid, curr = curr.len(), "poll applied, no change");
        }

        Ok(PollOutcome {
            curr_count: curr.len(),
            drops_emitted: drops_inserted,
            closures: closed_states.len(),
            bootstrapped: false,
        })
    }

    async fn upsert_venue_seen(&self, slot: &NormalizedSlot, now: DateTime<Utc>) {
        if let Err(e) = self
            .stores
            .venues
            .upsert_seen(&slot.venue_id, Some(slot.venue_name.as_str()), now)
            .await
        {
            tracing::warn!(venue_id = %slot.venue_id, error = %e, "failed to record venue sighting");
        }
    }

    async fn record_new_drop_metric(&self, slot: &NormalizedSlot, now: DateTime<Utc>) {
        let window_date = now.date_naive();
        if let Err(e) = self
            .stores
            .metrics
            .record_new_drop(&slot.venue_id, Some(slot.venue_name.as_str()), window_date)
            .await
        {
            tracing::warn!(venue_id = %slot.venue_id, error = %e, "failed to record new-drop metric");
        }
    }

    async fn aggregate_closures(&self, closed: &[tablewatch_store::ClosedState]) {
        if closed.is_empty() {
            return;
        }
        let mut ids = Vec::with_capacity(closed.len());
        for row in closed {
            let Some(venue_id) = row.venue_id.as_deref() else {
                ids.push(row.id);
                continue;
            };
            let window_date = row
                .slot_date
                .as_deref()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .unwrap_or_else(|| self.clock.now().date_naive());

            if let Err(e) = self
                .stores
                .metrics
                .record_closure(venue_id, row.venue_name.as_deref(), window_date, row.duration_seconds)
                .await
            {
                tracing::warn!(venue_id, error = %e, "failed to record closure metric, skipping aggregation for this row");
                continue;
            }
            ids.push(row.id);
        }

        if let Err(e) = self
            .stores
            .state
            .mark_aggregated_and_prune(&ids, self.clock.now())
            .await
        {
            tracing::warn!(error = %e, "failed to mark availability-state rows aggregated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablewatch_providers::{FakeFailure, FakeProviderAdapter};

    #[test]
    fn poll_outcome_defaults_to_zero() {
        let outcome = PollOutcome::default();
        assert_eq!(outcome.curr_count, 0);
        assert_eq!(outcome.drops_emitted, 0);
        assert!(!outcome.bootstrapped);
    }

    #[tokio::test]
    async fn fake_adapter_transport_failure_is_distinguishable() {
        // Exercises the same contract run_once relies on: a scripted
        // transport failure must not be confused with a legitimate empty
        // response, even without a live database to run run_once against.
        let fake = FakeProviderAdapter::new("resy");
        fake.set_failure("2026-02-14", "20:30", FakeFailure::Transport);
        let result = fake.search_availability("2026-02-14", "20:30", &[2, 4]).await;
        assert!(result.is_err());
    }
}
