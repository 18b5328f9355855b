//! Dispatch Scheduler (component D): owns process-local cooldown state and a
//! bounded worker pool over the Poll Worker.
//!
//! Responsibilities:
//!   - Track `next_run_after`/`in_flight` per `(bucket_id, provider_id)` pair
//!     (one provider may lag another on the same bucket, so they cool down
//!     independently).
//!   - Enumerate the current window every tick and fold in bucket rows the
//!     window grew to include, dropping ones that fell out.
//!   - Dispatch ready pairs onto a worker pool bounded at `max_concurrent_buckets`.
//!   - Expose a heartbeat snapshot for the health surface.
//!
//! Non-responsibilities:
//!   - Never decides *what* a poll does; that is entirely the Poll Worker's
//!     12-step state machine.
//!   - Never blocks on a slow bucket: there is no global barrier between
//!     ticks, and one worker's completion never waits on another's.
//!
//! Safety/liveness properties:
//!   - On process restart, cooldown state is empty, so every bucket is
//!     immediately ready; correctness rests entirely on the advisory lock in
//!     the Poll Worker, not on scheduler memory.
//!   - A pair can appear in `in_flight` at most once; `ready` is always
//!     disjoint from `in_flight`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tablewatch_core::clock::Clock;
use tablewatch_core::config::Config;
use tablewatch_core::domain::{window_start_date, BucketId};
use tablewatch_providers::ProviderAdapter;
use tablewatch_runtime::metrics::SchedulerMetrics;
use tablewatch_store::Stores;
use tokio::sync::Mutex;

use crate::poll_worker::PollWorker;

/// One `(bucket, provider)` dispatch key. A bucket's projection rows are
/// partitioned by provider via the provider prefix baked into every slot id,
/// so two providers polling the same bucket never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DispatchKey {
    bucket_id: BucketId,
    provider_id: String,
}

/// Point-in-time scheduler status for the health surface.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    /// When the most recent tick started.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Number of pairs currently dispatched to the worker pool.
    pub in_flight: usize,
    /// When any worker last completed a poll.
    pub last_completion_at: Option<DateTime<Utc>>,
    /// Total ticks processed since startup.
    pub ticks: u64,
}

#[derive(Default)]
struct SchedulerState {
    next_run_after: HashMap<DispatchKey, DateTime<Utc>>,
    in_flight: HashSet<DispatchKey>,
    last_tick_at: Option<DateTime<Utc>>,
    last_completion_at: Option<DateTime<Utc>>,
}

/// Dispatches bucket polls across a bounded worker pool with per-pair
/// cooldown. Cheap to clone: every field is an `Arc`, so the scheduler can be
/// handed to a `tokio::spawn`ed loop while the caller keeps its own handle
/// for tests or the health endpoint.
#[derive(Clone)]
pub struct Scheduler {
    stores: Arc<Stores>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    providers: Arc<Vec<Box<dyn ProviderAdapter>>>,
    worker: Arc<PollWorker>,
    state: Arc<Mutex<SchedulerState>>,
    semaphore: Arc<tokio::sync::Semaphore>,
    ticks_total: Arc<AtomicU64>,
}

impl Scheduler {
    /// Builds a scheduler over the given stores, providers, and config.
    #[must_use]
    pub fn new(
        stores: Arc<Stores>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
        providers: Vec<Box<dyn ProviderAdapter>>,
    ) -> Self {
        let notified_dedupe =
            chrono::Duration::from_std(config.notified_dedupe).unwrap_or(chrono::Duration::minutes(30));
        let worker = Arc::new(PollWorker::new(stores.clone(), clock.clone(), notified_dedupe));
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_buckets)),
            stores,
            clock,
            config,
            providers: Arc::new(providers),
            worker,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            ticks_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current heartbeat snapshot for the health surface.
    pub async fn heartbeat(&self) -> Heartbeat {
        let state = self.state.lock().await;
        Heartbeat {
            last_tick_at: state.last_tick_at,
            in_flight: state.in_flight.len(),
            last_completion_at: state.last_completion_at,
            ticks: self.ticks_total.load(Ordering::Relaxed),
        }
    }

    /// Runs the scheduler loop forever at `config.tick_period`, until
    /// `cancel` resolves.
    pub async fn run(&self, cancel: impl std::future::Future<Output = ()>) {
        tokio::pin!(cancel);
        let mut interval = tokio::time::interval(self.config.tick_period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                () = &mut cancel => {
                    tracing::info!("scheduler received shutdown signal, stopping");
                    return;
                }
            }
        }
    }

    /// Runs exactly one scheduler tick: window maintenance, ready-set
    /// computation, and dispatch. Exposed directly so tests can drive ticks
    /// deterministically without a real timer.
    #[tracing::instrument(skip(self), fields(in_flight = tracing::field::Empty))]
    pub async fn tick(&self) {
        let now = self.clock.now();
        let window_start = window_start_date(now, self.config.date_timezone);

        if let Err(e) = self
            .stores
            .buckets
            .ensure_buckets(window_start, self.config.window_days, &self.config.time_slots)
            .await
        {
            tracing::warn!(error = %e, "ensure_buckets failed this tick, window may lag");
        }

        let window_ids: HashSet<BucketId> = tablewatch_store::BucketStore::window_bucket_ids(
            window_start,
            self.config.window_days,
            &self.config.time_slots,
        )
        .into_iter()
        .collect();

        let ready = self.compute_ready(&window_ids, now).await;

        let in_flight_count = {
            let state = self.state.lock().await;
            state.in_flight.len()
        };
        tracing::Span::current().record("in_flight", in_flight_count);

        let slots_available = self.config.max_concurrent_buckets.saturating_sub(in_flight_count);
        for key in ready.into_iter().take(slots_available) {
            self.dispatch(key, now);
        }

        let tick_count = self.ticks_total.fetch_add(1, Ordering::Relaxed) + 1;
        if tick_count % 30 == 0 {
            self.run_throttled_maintenance().await;
        }

        let snapshot_in_flight = {
            let mut state = self.state.lock().await;
            state.last_tick_at = Some(now);
            state.in_flight.len()
        };
        SchedulerMetrics::record_tick(snapshot_in_flight);
    }

    async fn compute_ready(&self, window_ids: &HashSet<BucketId>, now: DateTime<Utc>) -> Vec<DispatchKey> {
        let mut state = self.state.lock().await;

        state.next_run_after.retain(|key, _| window_ids.contains(&key.bucket_id));
        state.in_flight.retain(|key| window_ids.contains(&key.bucket_id));

        let mut ready = Vec::new();
        for bucket_id in window_ids {
            for provider in self.providers.iter() {
                let key = DispatchKey {
                    bucket_id: bucket_id.clone(),
                    provider_id: provider.provider_id().to_string(),
                };
                if state.in_flight.contains(&key) {
                    continue;
                }
                let due = state.next_run_after.get(&key).is_none_or(|at| *at <= now);
                if due {
                    ready.push(key);
                }
            }
        }
        ready
    }

    fn dispatch(&self, key: DispatchKey, now: DateTime<Utc>) {
        let worker = self.worker.clone();
        let providers = self.providers.clone();
        let config = self.config.clone();
        let semaphore = self.semaphore.clone();
        let state = self.state.clone();
        let cooldown =
            chrono::Duration::from_std(config.bucket_cooldown).unwrap_or(chrono::Duration::seconds(30));

        tokio::spawn(async move {
            {
                let mut state = state.lock().await;
                state.in_flight.insert(key.clone());
            }
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("scheduler semaphore is never closed");

            let outcome = match providers.iter().find(|p| p.provider_id() == key.provider_id) {
                None => {
                    tracing::error!(provider_id = %key.provider_id, "dispatched for unregistered provider");
                    None
                }
                Some(provider) => {
                    let date_str = key.bucket_id.date_str().to_string();
                    let time_slot = key.bucket_id.time_slot().to_string();
                    Some(
                        worker
                            .run_once(provider.as_ref(), &key.bucket_id, &date_str, &time_slot, &config.party_sizes)
                            .await,
                    )
                }
            };

            match outcome {
                Some(Ok(result)) if result.drops_emitted > 0 || result.closures > 0 => {
                    tracing::info!(
                        bucket_id = %key.bucket_id,
                        provider = %key.provider_id,
                        drops = result.drops_emitted,
                        closures = result.closures,
                        "poll completed with changes"
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if e.is_retryable() => {
                    tracing::debug!(bucket_id = %key.bucket_id, provider = %key.provider_id, error = %e, "poll tick failed, will retry after cooldown");
                }
                Some(Err(e)) => {
                    tracing::error!(bucket_id = %key.bucket_id, provider = %key.provider_id, error = %e, "poll tick failed");
                }
                None => {}
            }

            let completed_at = now + cooldown;
            let mut state = state.lock().await;
            state.in_flight.remove(&key);
            state.next_run_after.insert(key, completed_at);
            state.last_completion_at = Some(completed_at);
        });
    }

    async fn run_throttled_maintenance(&self) {
        let first_anchor = self.config.time_slots.first().cloned().unwrap_or_default();
        let window_start_bucket =
            format!("{}_{first_anchor}", window_start_date(self.clock.now(), self.config.date_timezone));

        if let Err(e) = self.stores.slots.prune_before_bucket(&window_start_bucket).await {
            tracing::warn!(error = %e, "throttled projection prune failed");
        }
        if let Err(e) = self
            .stores
            .drops
            .prune(
                &window_start_bucket,
                self.clock.now(),
                chrono::Duration::days(i64::from(self.config.drop_events_retention_days)),
            )
            .await
        {
            tracing::warn!(error = %e, "throttled drop-event prune failed");
        }
        match self.stores.state.select_unaggregated(500).await {
            Ok(rows) if !rows.is_empty() => {
                tracing::debug!(count = rows.len(), "throttled aggregation backlog observed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "throttled aggregation scan failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_key_equality_is_by_bucket_and_provider() {
        let a = DispatchKey {
            bucket_id: BucketId::new("2026-02-14".to_string(), "20:30".to_string()),
            provider_id: "resy".to_string(),
        };
        let b = DispatchKey {
            bucket_id: BucketId::new("2026-02-14".to_string(), "20:30".to_string()),
            provider_id: "opentable".to_string(),
        };
        assert_ne!(a, b);
    }
}
