//! # Tablewatch Store
//!
//! `PostgreSQL` persistence for the discovery engine: the bucket store, the
//! slot-availability projection, the drop-event log, availability state,
//! venue identity, aggregated metrics, and the notification tables.
//!
//! Every mutating method here either runs inside a caller-supplied
//! transaction (the poll worker's steps 3-11 share one transaction guarded
//! by the per-bucket advisory lock) or owns a single autocommit statement
//! for independent maintenance jobs (retention, aggregation, notification
//! fan-out).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod advisory_lock;
pub mod availability_state;
pub mod bucket;
pub mod drop_event;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod read_api;
pub mod slot_availability;
pub mod venue;

pub use advisory_lock::try_acquire_bucket_lock;
pub use availability_state::{AvailabilityStateStore, ClosedState};
pub use bucket::{Bucket, BucketStore};
pub use drop_event::{DropEventRow, DropEventStore};
pub use error::StoreError;
pub use metrics::{rarity_score, scarcity_score, MetricsStore, VenueMetricsRow, VenueRollingMetricsRow};
pub use notify::{NotifyStore, Preference};
pub use slot_availability::SlotAvailabilityStore;
pub use venue::VenueStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Builds a connection pool sized per the configuration surface.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if the pool cannot connect.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Every store the engine depends on, grouped for convenient wiring at
/// startup.
#[derive(Clone)]
pub struct Stores {
    /// Connection pool shared by every store.
    pub pool: PgPool,
    /// Bucket CRUD and window maintenance.
    pub buckets: std::sync::Arc<BucketStore>,
    /// The slot-availability projection.
    pub slots: std::sync::Arc<SlotAvailabilityStore>,
    /// The drop-event log.
    pub drops: std::sync::Arc<DropEventStore>,
    /// Availability state feeding the aggregator.
    pub state: std::sync::Arc<AvailabilityStateStore>,
    /// Venue identity.
    pub venues: std::sync::Arc<VenueStore>,
    /// Aggregated metrics.
    pub metrics: std::sync::Arc<MetricsStore>,
    /// Push tokens, notify preferences, user notifications.
    pub notify: std::sync::Arc<NotifyStore>,
}

impl Stores {
    /// Wraps one pool into every store, sharing the connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            buckets: std::sync::Arc::new(BucketStore::new(pool.clone())),
            slots: std::sync::Arc::new(SlotAvailabilityStore::new(pool.clone())),
            drops: std::sync::Arc::new(DropEventStore::new(pool.clone())),
            state: std::sync::Arc::new(AvailabilityStateStore::new(pool.clone())),
            venues: std::sync::Arc::new(VenueStore::new(pool.clone())),
            metrics: std::sync::Arc::new(MetricsStore::new(pool.clone())),
            notify: std::sync::Arc::new(NotifyStore::new(pool.clone())),
            pool,
        }
    }
}
