//! Poll-worker diff-logic scenarios against a real Postgres instance.
//!
//! Requires Docker/Postgres: run with
//! `DATABASE_URL=postgres://... cargo test --test poll_worker_integration -- --ignored`

use std::sync::Arc;
use tablewatch_engine::PollWorker;
use tablewatch_providers::FakeProviderAdapter;
use tablewatch_store::Stores;
use tablewatch_testing::{test_clock, SlotBuilder};

async fn test_stores() -> Stores {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = tablewatch_store::connect(&database_url, 5).await.expect("connect");
    Stores::new(pool)
}

#[tokio::test]
#[ignore]
async fn first_poll_bootstraps_without_emitting_drops() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let slots = SlotBuilder::new("resy")
        .with("venue-1", "Le Bernardin", "2026-03-01T20:30:00Z")
        .build();
    provider.set_slots("2026-03-01", "20:30", slots);

    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-01".to_string(), "20:30".to_string());
    let outcome = worker
        .run_once(&provider, &bucket_id, "2026-03-01", "20:30", &[2, 4])
        .await
        .expect("bootstrap poll should succeed");

    assert!(outcome.bootstrapped);
    assert_eq!(outcome.curr_count, 1);
    assert_eq!(outcome.drops_emitted, 0, "the baseline poll never emits drops");
}

#[tokio::test]
#[ignore]
async fn a_new_venue_opening_after_baseline_is_a_genuine_drop() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-02".to_string(), "19:00".to_string());

    let baseline = SlotBuilder::new("resy")
        .with("venue-1", "Rezdora", "2026-03-02T19:00:00Z")
        .build();
    provider.set_slots("2026-03-02", "19:00", baseline);
    worker
        .run_once(&provider, &bucket_id, "2026-03-02", "19:00", &[2])
        .await
        .expect("bootstrap");

    let with_new_venue = SlotBuilder::new("resy")
        .with("venue-1", "Rezdora", "2026-03-02T19:00:00Z")
        .with("venue-2", "Carbone", "2026-03-02T19:15:00Z")
        .build();
    provider.set_slots("2026-03-02", "19:00", with_new_venue);

    let outcome = worker
        .run_once(&provider, &bucket_id, "2026-03-02", "19:00", &[2])
        .await
        .expect("second poll");

    assert!(!outcome.bootstrapped);
    assert_eq!(outcome.drops_emitted, 1, "only the new venue's slot is a genuine drop");
}

#[tokio::test]
#[ignore]
async fn a_second_time_slot_at_an_already_open_venue_is_not_a_drop() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-03".to_string(), "19:00".to_string());

    let baseline = SlotBuilder::new("resy")
        .with("venue-1", "Rezdora", "2026-03-03T19:00:00Z")
        .build();
    provider.set_slots("2026-03-03", "19:00", baseline);
    worker
        .run_once(&provider, &bucket_id, "2026-03-03", "19:00", &[2])
        .await
        .expect("bootstrap");

    let with_second_time = SlotBuilder::new("resy")
        .with("venue-1", "Rezdora", "2026-03-03T19:00:00Z")
        .with("venue-1", "Rezdora", "2026-03-03T19:15:00Z")
        .build();
    provider.set_slots("2026-03-03", "19:00", with_second_time);

    let outcome = worker
        .run_once(&provider, &bucket_id, "2026-03-03", "19:00", &[2])
        .await
        .expect("second poll");

    assert_eq!(outcome.drops_emitted, 0, "the venue already had availability");
    assert_eq!(outcome.curr_count, 2);
}

#[tokio::test]
#[ignore]
async fn a_slot_closing_and_reopening_within_the_dedupe_window_is_not_a_new_drop() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-04".to_string(), "19:00".to_string());

    let baseline = SlotBuilder::new("resy")
        .with("venue-1", "Lilia", "2026-03-04T19:00:00Z")
        .build();
    provider.set_slots("2026-03-04", "19:00", baseline);
    worker
        .run_once(&provider, &bucket_id, "2026-03-04", "19:00", &[2])
        .await
        .expect("bootstrap");

    let with_new_venue = SlotBuilder::new("resy")
        .with("venue-1", "Lilia", "2026-03-04T19:00:00Z")
        .with("venue-2", "Don Angie", "2026-03-04T19:30:00Z")
        .build();
    provider.set_slots("2026-03-04", "19:00", with_new_venue.clone());
    let first = worker
        .run_once(&provider, &bucket_id, "2026-03-04", "19:00", &[2])
        .await
        .expect("poll emitting the first drop");
    assert_eq!(first.drops_emitted, 1);

    // venue-2 disappears and immediately reappears, well within the
    // configured 30-minute dedupe window.
    provider.set_slots("2026-03-04", "19:00", baseline_only(&with_new_venue));
    worker
        .run_once(&provider, &bucket_id, "2026-03-04", "19:00", &[2])
        .await
        .expect("poll closing venue-2");

    provider.set_slots("2026-03-04", "19:00", with_new_venue);
    let reopened = worker
        .run_once(&provider, &bucket_id, "2026-03-04", "19:00", &[2])
        .await
        .expect("poll reopening venue-2");

    assert_eq!(reopened.drops_emitted, 0, "re-emergence within the dedupe window is not a new drop");
}

fn baseline_only(slots: &[tablewatch_core::domain::NormalizedSlot]) -> Vec<tablewatch_core::domain::NormalizedSlot> {
    slots.iter().filter(|s| s.venue_id == "venue-1").cloned().collect()
}

#[tokio::test]
#[ignore]
async fn closures_are_aggregated_into_venue_metrics() {
    use sqlx::Row;

    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-05".to_string(), "19:00".to_string());

    let baseline = SlotBuilder::new("resy")
        .with("venue-1", "Via Carota", "2026-03-05T19:00:00Z")
        .with("venue-2", "Lilia", "2026-03-05T19:15:00Z")
        .build();
    provider.set_slots("2026-03-05", "19:00", baseline.clone());
    worker
        .run_once(&provider, &bucket_id, "2026-03-05", "19:00", &[2])
        .await
        .expect("bootstrap");

    let with_additions = SlotBuilder::new("resy")
        .with("venue-1", "Via Carota", "2026-03-05T19:00:00Z")
        .with("venue-1", "Via Carota", "2026-03-05T19:30:00Z")
        .with("venue-2", "Lilia", "2026-03-05T19:15:00Z")
        .with("venue-3", "Carbone", "2026-03-05T20:00:00Z")
        .build();
    provider.set_slots("2026-03-05", "19:00", with_additions.clone());
    let grown = worker
        .run_once(&provider, &bucket_id, "2026-03-05", "19:00", &[2])
        .await
        .expect("poll adding venue-1's second slot and new venue-3");
    assert_eq!(grown.drops_emitted, 1, "only venue-3's arrival is a genuine drop");

    // venue-1's second slot and venue-3's slot both disappear.
    provider.set_slots("2026-03-05", "19:00", baseline);
    let closed = worker
        .run_once(&provider, &bucket_id, "2026-03-05", "19:00", &[2])
        .await
        .expect("poll closing the two added slots");

    assert_eq!(closed.closures, 2, "both disappeared slots transition to closed");

    for venue_id in ["venue-1", "venue-3"] {
        let row = sqlx::query("SELECT closed_count FROM venue_metrics WHERE venue_id = $1")
            .bind(venue_id)
            .fetch_optional(&stores.pool)
            .await
            .expect("query venue_metrics")
            .unwrap_or_else(|| panic!("venue_metrics row for {venue_id} should exist after closure"));
        let closed_count: i32 = row.get("closed_count");
        assert_eq!(closed_count, 1, "{venue_id} should have exactly one closure aggregated");
    }
}

#[tokio::test]
#[ignore]
async fn two_workers_racing_the_same_bucket_only_one_acquires_the_lock() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let worker = PollWorker::new(stores.clone(), clock.clone(), chrono::Duration::minutes(30));

    let provider = FakeProviderAdapter::new("resy");
    let bucket_id = tablewatch_core::domain::BucketId::new("2026-03-06".to_string(), "19:00".to_string());
    let slots = SlotBuilder::new("resy")
        .with("venue-1", "Via Carota", "2026-03-06T19:00:00Z")
        .build();
    provider.set_slots("2026-03-06", "19:00", slots);

    let (first, second) = tokio::join!(
        worker.run_once(&provider, &bucket_id, "2026-03-06", "19:00", &[2]),
        worker.run_once(&provider, &bucket_id, "2026-03-06", "19:00", &[2]),
    );

    let outcomes = [first, second];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    let contended = outcomes
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(tablewatch_core::error::DiscoveryError::LockContention(_))
            )
        })
        .count();

    assert_eq!(succeeded, 1, "exactly one racer should acquire the advisory lock and run");
    assert_eq!(contended, 1, "the other racer must back off without writing");
}
