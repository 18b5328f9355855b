//! Availability state (`AvailabilityState`): one row per currently- or
//! recently-open `(bucket_id, slot_id)`, feeding the aggregator.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tablewatch_core::domain::NormalizedSlot;

/// A closed availability-state row staged for aggregation.
#[derive(Debug, Clone)]
pub struct ClosedState {
    /// Row id.
    pub id: i64,
    /// Owning bucket.
    pub bucket_id: String,
    /// The slot that closed.
    pub slot_id: String,
    /// Denormalized venue id.
    pub venue_id: Option<String>,
    /// Denormalized venue name.
    pub venue_name: Option<String>,
    /// How long the slot stayed open.
    pub duration_seconds: i64,
    /// The calendar date of the slot (for per-day aggregation).
    pub slot_date: Option<String>,
}

/// Postgres-backed store for `availability_state`.
pub struct AvailabilityStateStore {
    pool: PgPool,
}

impl AvailabilityStateStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts an open state row for each slot in `added` lacking one (step
    /// 9). A slot reopening after closure never updates its prior row in
    /// place — that row's `closed_at` is a permanent fact once set — so any
    /// stale closed-and-not-yet-aggregated row for the same `(bucket_id,
    /// slot_id)` is deleted first and the reopen gets a fresh row with its
    /// own id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if an upsert fails.
    pub async fn upsert_open(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        added: &[&NormalizedSlot],
        slot_date: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for slot in added {
            sqlx::query(
                "DELETE FROM availability_state WHERE bucket_id = $1 AND slot_id = $2 AND closed_at IS NOT NULL",
            )
            .bind(bucket_id)
            .bind(&slot.slot_id)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r"
                INSERT INTO availability_state
                    (bucket_id, slot_id, opened_at, closed_at, venue_id, venue_name, slot_date)
                VALUES ($1, $2, $3, NULL, $4, $5, $6)
                ON CONFLICT (bucket_id, slot_id) DO NOTHING
                ",
            )
            .bind(bucket_id)
            .bind(&slot.slot_id)
            .bind(now)
            .bind(&slot.venue_id)
            .bind(&slot.venue_name)
            .bind(slot_date)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Closes the state row for every slot in `closed_slot_ids` and returns
    /// them for aggregation staging (step 10).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn close(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        closed_slot_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedState>, StoreError> {
        if closed_slot_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query(
            r"
            UPDATE availability_state
            SET closed_at = $3,
                duration_seconds = GREATEST(0, EXTRACT(EPOCH FROM ($3 - opened_at))::INTEGER)
            WHERE bucket_id = $1 AND slot_id = ANY($2) AND closed_at IS NULL
            ",
        )
        .bind(bucket_id)
        .bind(closed_slot_ids)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        let rows = sqlx::query(
            r"
            SELECT id, bucket_id, slot_id, venue_id, venue_name, duration_seconds, slot_date
            FROM availability_state
            WHERE bucket_id = $1 AND slot_id = ANY($2) AND closed_at = $3
            ",
        )
        .bind(bucket_id)
        .bind(closed_slot_ids)
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClosedState {
                id: row.get("id"),
                bucket_id: row.get("bucket_id"),
                slot_id: row.get("slot_id"),
                venue_id: row.get("venue_id"),
                venue_name: row.get("venue_name"),
                duration_seconds: row.get::<Option<i32>, _>("duration_seconds").unwrap_or(0).into(),
                slot_date: row.get("slot_date"),
            })
            .collect())
    }

    /// Loads every closed-but-unaggregated state row, bounded by `limit`,
    /// for the incremental aggregator (step 12). A row is only ever
    /// aggregated once: `aggregated_at IS NULL` is the idempotency guard
    /// that makes this safe across retries and concurrent workers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn select_unaggregated(&self, limit: i64) -> Result<Vec<ClosedState>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, bucket_id, slot_id, venue_id, venue_name, duration_seconds, slot_date
            FROM availability_state
            WHERE closed_at IS NOT NULL AND aggregated_at IS NULL
            ORDER BY closed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClosedState {
                id: row.get("id"),
                bucket_id: row.get("bucket_id"),
                slot_id: row.get("slot_id"),
                venue_id: row.get("venue_id"),
                venue_name: row.get("venue_name"),
                duration_seconds: row.get::<Option<i32>, _>("duration_seconds").unwrap_or(0).into(),
                slot_date: row.get("slot_date"),
            })
            .collect())
    }

    /// Marks the given rows aggregated and deletes any that are now both
    /// closed and aggregated (end of step 12).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if either statement fails.
    pub async fn mark_aggregated_and_prune(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        sqlx::query("UPDATE availability_state SET aggregated_at = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "DELETE FROM availability_state WHERE id = ANY($1) AND closed_at IS NOT NULL AND aggregated_at IS NOT NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes state rows whose bucket fell out of the window (retention
    /// job).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn prune_before_bucket(&self, window_start_bucket_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM availability_state WHERE bucket_id < $1")
            .bind(window_start_bucket_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
