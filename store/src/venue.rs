//! Venue identity store: `venue_id` deduplication, `first_seen_at`/
//! `last_seen_at` tracking.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Postgres-backed store for `venues`.
pub struct VenueStore {
    pool: PgPool,
}

impl VenueStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts a venue, bumping `last_seen_at` on every drop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn upsert_seen(
        &self,
        venue_id: &str,
        venue_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO venues (venue_id, venue_name, first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (venue_id) DO UPDATE SET
                venue_name = COALESCE(EXCLUDED.venue_name, venues.venue_name),
                last_seen_at = EXCLUDED.last_seen_at
            ",
        )
        .bind(venue_id)
        .bind(venue_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes venues not seen within `cutoff` (retention job).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn prune_unseen_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM venues WHERE last_seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
