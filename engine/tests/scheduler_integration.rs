//! Dispatch scheduler liveness against a real Postgres instance.
//!
//! Requires Docker/Postgres: run with
//! `DATABASE_URL=postgres://... cargo test --test scheduler_integration -- --ignored`

use std::sync::Arc;
use std::time::Duration;
use tablewatch_core::clock::Clock;
use tablewatch_core::config::Config;
use tablewatch_engine::Scheduler;
use tablewatch_providers::{FakeProviderAdapter, ProviderAdapter};
use tablewatch_store::Stores;
use tablewatch_testing::{test_clock, SlotBuilder};

async fn test_stores() -> Stores {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = tablewatch_store::connect(&database_url, 5).await.expect("connect");
    Stores::new(pool)
}

/// A single-bucket, single-anchor window so one tick dispatches exactly one
/// pair and the test isn't racing a real 24h/anchor-list window shape.
fn test_config() -> Config {
    Config {
        date_timezone: chrono_tz::UTC,
        window_days: 1,
        time_slots: vec!["20:00".to_string()],
        party_sizes: vec![2],
        max_concurrent_buckets: 4,
        bucket_cooldown: Duration::from_secs(30),
        tick_period: Duration::from_secs(1),
        notified_dedupe: Duration::from_secs(1800),
        drop_events_retention_days: 7,
        provider_per_page: 100,
        provider_max_pages: 5,
        push_window: Duration::from_secs(900),
        notification_tick_period: Duration::from_secs(60),
        metrics_retention_days: 90,
        venues_retention_days: 90,
        notifications_retention_days: 30,
        database_url: String::new(),
        database_max_connections: 5,
    }
}

#[tokio::test]
#[ignore]
async fn a_ready_bucket_is_dispatched_and_cools_down_after_completion() {
    let stores = Arc::new(test_stores().await);
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let config = Arc::new(test_config());

    // window_start_date(2026-02-14T20:00Z, UTC) - 1 day = 2026-02-13, so the
    // single anchor bucket this window covers is 2026-02-13_20:00.
    let provider = FakeProviderAdapter::new("resy");
    let slots = SlotBuilder::new("resy")
        .with("venue-1", "Carbone", "2026-02-13T20:00:00Z")
        .build();
    provider.set_slots("2026-02-13", "20:00", slots);

    let providers: Vec<Box<dyn ProviderAdapter>> = vec![Box::new(provider)];
    let scheduler = Scheduler::new(stores.clone(), clock.clone(), config.clone(), providers);

    scheduler.tick().await;

    let mut waited = Duration::ZERO;
    while scheduler.heartbeat().await.in_flight > 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }

    let heartbeat = scheduler.heartbeat().await;
    assert_eq!(heartbeat.ticks, 1);
    assert_eq!(heartbeat.in_flight, 0, "the single dispatched poll should have completed");
    assert!(heartbeat.last_completion_at.is_some());
}

#[tokio::test]
#[ignore]
async fn a_pair_already_in_flight_is_not_dispatched_twice_in_the_same_tick() {
    let stores = Arc::new(test_stores().await);
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let config = Arc::new(test_config());

    let provider = FakeProviderAdapter::new("resy");
    provider.set_slots("2026-02-13", "20:00", Vec::new());

    let providers: Vec<Box<dyn ProviderAdapter>> = vec![Box::new(provider)];
    let scheduler = Scheduler::new(stores.clone(), clock.clone(), config.clone(), providers);

    scheduler.tick().await;
    scheduler.tick().await;

    let heartbeat = scheduler.heartbeat().await;
    assert_eq!(heartbeat.ticks, 2, "both ticks should be counted even if the second finds nothing new to dispatch");
}
