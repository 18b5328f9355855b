//! Retention & Sliding Window (component E): the daily job that advances the
//! window and prunes everything that fell outside it.
//!
//! Every prune step is independently wrapped (error kind 6 in the design
//! notes): one step failing is logged and does not prevent the rest of the
//! job from running. All operations here are idempotent, so a crashed or
//! doubly-scheduled run is harmless.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tablewatch_core::clock::Clock;
use tablewatch_core::config::Config;
use tablewatch_core::domain::window_start_date;
use tablewatch_providers::ProviderAdapter;
use tablewatch_store::Stores;

use crate::poll_worker::PollWorker;

/// Counts of rows removed per prune step, for the daily job's log line.
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    /// Bucket rows dropped.
    pub buckets: u64,
    /// Projection rows dropped.
    pub slots: u64,
    /// Availability-state rows dropped.
    pub state: u64,
    /// Drop-event rows dropped (both passes combined).
    pub drop_events: u64,
    /// Metrics rows dropped (venue, market, and rolling combined).
    pub metrics: u64,
    /// Venue rows dropped.
    pub venues: u64,
    /// Bucket rows created for the newly advanced window.
    pub ensured: usize,
}

/// Runs the retention job once: advances the window and prunes every table
/// outside it. `providers` runs a baseline poll (fetch, then
/// `baseline=prev=curr`) against every newly-created bucket so the first
/// regular scheduler tick to reach it already has a diff base, per the
/// window-advance contract.
pub async fn run(
    stores: &Arc<Stores>,
    clock: &Arc<dyn Clock>,
    config: &Config,
    providers: &[Box<dyn ProviderAdapter>],
) -> RetentionReport {
    let now = clock.now();
    let window_start = window_start_date(now, config.date_timezone);
    let first_anchor = config.time_slots.first().cloned().unwrap_or_default();
    let window_start_bucket = format!("{window_start}_{first_anchor}");

    let mut report = RetentionReport::default();

    match stores.buckets.prune_before(window_start).await {
        Ok(n) => report.buckets = n,
        Err(e) => tracing::error!(error = %e, "retention: prune_before(buckets) failed"),
    }

    match stores.slots.prune_before_bucket(&window_start_bucket).await {
        Ok(n) => report.slots = n,
        Err(e) => tracing::error!(error = %e, "retention: prune_before_bucket(slots) failed"),
    }

    match stores.state.prune_before_bucket(&window_start_bucket).await {
        Ok(n) => report.state = n,
        Err(e) => tracing::error!(error = %e, "retention: prune_before_bucket(state) failed"),
    }

    let drop_events_retention = chrono::Duration::days(i64::from(config.drop_events_retention_days));
    match stores.drops.prune(&window_start_bucket, now, drop_events_retention).await {
        Ok(n) => report.drop_events = n,
        Err(e) => tracing::error!(error = %e, "retention: prune(drop_events) failed"),
    }

    let metrics_cutoff = now.date_naive() - chrono::Duration::days(i64::from(config.metrics_retention_days));
    match stores.metrics.prune_before(metrics_cutoff).await {
        Ok(n) => report.metrics = n,
        Err(e) => tracing::error!(error = %e, "retention: prune_before(metrics) failed"),
    }

    let venues_cutoff: DateTime<Utc> = now - chrono::Duration::days(i64::from(config.venues_retention_days));
    match stores.venues.prune_unseen_since(venues_cutoff).await {
        Ok(n) => report.venues = n,
        Err(e) => tracing::error!(error = %e, "retention: prune_unseen_since(venues) failed"),
    }

    let new_buckets = match stores
        .buckets
        .ensure_buckets(window_start, config.window_days, &config.time_slots)
        .await
    {
        Ok(created) => {
            report.ensured = created.len();
            created
        },
        Err(e) => {
            tracing::error!(error = %e, "retention: ensure_buckets for advanced window failed");
            Vec::new()
        },
    };

    if !new_buckets.is_empty() {
        run_baseline_for_new_buckets(stores, clock, config, providers, &new_buckets).await;
    }

    tracing::info!(
        window_start = %window_start,
        buckets_pruned = report.buckets,
        slots_pruned = report.slots,
        state_pruned = report.state,
        drop_events_pruned = report.drop_events,
        metrics_pruned = report.metrics,
        venues_pruned = report.venues,
        buckets_ensured = report.ensured,
        "retention run complete"
    );

    report
}

/// Runs a baseline poll (bootstrap: fetch, then `baseline=prev=curr`)
/// against every bucket in `new_buckets`, for every registered provider.
/// Each poll is independently wrapped: one bucket/provider failing here is
/// logged and does not block the rest, same as every other retention step.
/// The poll worker's own advisory lock makes this safe to race against a
/// scheduler tick that reaches the same bucket first.
async fn run_baseline_for_new_buckets(
    stores: &Arc<Stores>,
    clock: &Arc<dyn Clock>,
    config: &Config,
    providers: &[Box<dyn ProviderAdapter>],
    new_buckets: &[(tablewatch_core::domain::BucketId, String, String)],
) {
    let notified_dedupe =
        chrono::Duration::from_std(config.notified_dedupe).unwrap_or(chrono::Duration::minutes(30));
    let worker = PollWorker::new(stores.clone(), clock.clone(), notified_dedupe);

    for (bucket_id, date_str, time_slot) in new_buckets {
        for provider in providers {
            if let Err(e) = worker
                .run_once(provider.as_ref(), bucket_id, date_str, time_slot, &config.party_sizes)
                .await
            {
                tracing::warn!(
                    bucket_id = %bucket_id,
                    provider = provider.provider_id(),
                    error = %e,
                    "retention: baseline poll for newly-windowed bucket failed"
                );
            }
        }
    }
}

/// Runs `run` once immediately, then every 24 hours, until `cancel` resolves.
pub async fn run_daily(
    stores: Arc<Stores>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    providers: Arc<Vec<Box<dyn ProviderAdapter>>>,
    cancel: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(cancel);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
    loop {
        tokio::select! {
            _ = interval.tick() => { run(&stores, &clock, &config, &providers).await; }
            () = &mut cancel => {
                tracing::info!("retention job received shutdown signal, stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablewatch_testing::test_clock;

    #[test]
    fn report_defaults_to_zero() {
        let report = RetentionReport::default();
        assert_eq!(report.buckets, 0);
        assert_eq!(report.ensured, 0);
    }

    #[test]
    fn window_start_is_stable_for_fixed_clock() {
        let clock = test_clock();
        let start_a = window_start_date(clock.now(), chrono_tz::America::New_York);
        let start_b = window_start_date(clock.now(), chrono_tz::America::New_York);
        assert_eq!(start_a, start_b);
    }
}
