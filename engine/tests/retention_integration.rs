//! Retention job idempotency against a real Postgres instance.
//!
//! Requires Docker/Postgres: run with
//! `DATABASE_URL=postgres://... cargo test --test retention_integration -- --ignored`

use std::sync::Arc;
use tablewatch_core::clock::Clock;
use tablewatch_core::config::Config;
use tablewatch_engine::run_retention;
use tablewatch_providers::{FakeProviderAdapter, ProviderAdapter};
use tablewatch_store::Stores;
use tablewatch_testing::test_clock;

async fn test_stores() -> Stores {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = tablewatch_store::connect(&database_url, 5).await.expect("connect");
    Stores::new(pool)
}

fn test_config() -> Config {
    Config {
        date_timezone: chrono_tz::UTC,
        window_days: 2,
        time_slots: vec!["19:00".to_string(), "20:00".to_string()],
        party_sizes: vec![2],
        max_concurrent_buckets: 4,
        bucket_cooldown: std::time::Duration::from_secs(30),
        tick_period: std::time::Duration::from_secs(1),
        notified_dedupe: std::time::Duration::from_secs(1800),
        drop_events_retention_days: 7,
        provider_per_page: 100,
        provider_max_pages: 5,
        push_window: std::time::Duration::from_secs(900),
        notification_tick_period: std::time::Duration::from_secs(60),
        metrics_retention_days: 90,
        venues_retention_days: 90,
        notifications_retention_days: 30,
        database_url: String::new(),
        database_max_connections: 5,
    }
}

#[tokio::test]
#[ignore]
async fn running_the_daily_job_twice_in_a_row_is_idempotent() {
    let stores = Arc::new(test_stores().await);
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let config = test_config();
    let providers: Vec<Box<dyn ProviderAdapter>> = vec![Box::new(FakeProviderAdapter::new("resy"))];

    let first = run_retention(&stores, &clock, &config, &providers).await;
    let second = run_retention(&stores, &clock, &config, &providers).await;

    assert!(first.ensured > 0, "the first run should create the window's bucket rows");
    assert_eq!(second.ensured, 0, "the second run finds every bucket already present");
    assert_eq!(second.buckets, 0, "nothing new should fall out of the window between back-to-back runs");
    assert_eq!(second.state, 0);
    assert_eq!(second.slots, 0);
}

#[tokio::test]
#[ignore]
async fn newly_windowed_buckets_get_a_baseline_poll() {
    let stores = Arc::new(test_stores().await);
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let config = test_config();
    let provider = FakeProviderAdapter::new("resy");
    let providers: Vec<Box<dyn ProviderAdapter>> = vec![Box::new(provider)];

    let report = run_retention(&stores, &clock, &config, &providers).await;
    assert!(report.ensured > 0);

    // Every bucket ensure_buckets created should already carry a baseline,
    // since run_retention polls each one immediately rather than leaving it
    // for the next scheduler tick.
    let row = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM discovery_buckets WHERE baseline_slot_ids IS NULL",
    )
    .fetch_one(&stores.pool)
    .await
    .expect("query discovery_buckets");
    assert_eq!(row, 0, "every newly-windowed bucket should have a baseline after retention runs");
}
