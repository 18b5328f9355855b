//! Fan-out behavior against a real Postgres instance.
//!
//! Requires Docker/Postgres: run with
//! `DATABASE_URL=postgres://... cargo test --test fanout_integration -- --ignored`

use std::sync::Arc;
use tablewatch_notify::FanoutJob;
use tablewatch_store::Stores;
use tablewatch_testing::{test_clock, SlotBuilder};

async fn test_stores() -> Stores {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = tablewatch_store::connect(&database_url, 5).await.expect("connect");
    Stores::new(pool)
}

#[tokio::test]
#[ignore]
async fn a_hotlist_drop_is_stamped_and_recorded() {
    let stores = Arc::new(test_stores().await);
    let clock = Arc::new(test_clock());
    let now = clock.now();

    let bucket_id = "2026-03-01_19:00";
    stores
        .buckets
        .bootstrap(
            &mut stores.pool.begin().await.expect("begin"),
            bucket_id,
            "2026-03-01",
            "19:00",
            &[],
            now,
        )
        .await
        .expect("bootstrap bucket row");

    let slots = SlotBuilder::new("resy")
        .with("venue-carbone", "Carbone", "2026-03-01T19:00:00Z")
        .build();

    let mut tx = stores.pool.begin().await.expect("begin");
    let to_emit: Vec<_> = slots.iter().collect();
    stores
        .drops
        .insert_drops(&mut tx, bucket_id, &to_emit, now)
        .await
        .expect("insert drop event");
    tx.commit().await.expect("commit");

    let job = FanoutJob::new(
        stores.clone(),
        clock.clone(),
        chrono::Duration::minutes(15),
        None,
        None,
        None,
    );

    let report = job.run_once().await;
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.matched, 1, "Carbone is on the builtin hotlist");
    assert_eq!(report.notifications_written, 1);

    let second_pass = job.run_once().await;
    assert_eq!(second_pass.evaluated, 0, "row was stamped pushed on the first pass");
}
