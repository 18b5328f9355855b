//! Slot Availability projection (`SlotAvailability`, primary key
//! `(bucket_id, slot_id)`).

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tablewatch_core::domain::NormalizedSlot;

/// Postgres-backed store for the projection table.
pub struct SlotAvailabilityStore {
    pool: PgPool,
}

impl SlotAvailabilityStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the set of distinct `venue_id`s with a `state=open` row in
    /// `bucket_id`, used to compute `drops_venue_zero` (step 5).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn open_venue_ids(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT venue_id FROM slot_availability
            WHERE bucket_id = $1 AND state = 'open' AND venue_id IS NOT NULL
            ",
        )
        .bind(bucket_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.get::<Option<String>, _>("venue_id"))
            .collect())
    }

    /// Bulk upserts one open projection row per slot in `added`, per step 7:
    /// overwrite only if the incoming `updated_at` beats the stored one, and
    /// clear `closed_at` on re-open. `slot_date` is the bucket's calendar
    /// date, carried onto the row so the read API can group by it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any upsert fails.
    pub async fn upsert_open(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        added: &[&NormalizedSlot],
        slot_date: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for slot in added {
            let payload = serde_json::to_value(&slot.payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO slot_availability
                    (bucket_id, slot_id, state, opened_at, closed_at, last_seen_at,
                     venue_id, venue_name, payload_json, run_id, updated_at, slot_date)
                VALUES ($1, $2, 'open', $3, NULL, $3, $4, $5, $6, $7, $3, $8)
                ON CONFLICT (bucket_id, slot_id) DO UPDATE SET
                    state = 'open',
                    closed_at = NULL,
                    last_seen_at = EXCLUDED.last_seen_at,
                    venue_id = EXCLUDED.venue_id,
                    venue_name = EXCLUDED.venue_name,
                    payload_json = EXCLUDED.payload_json,
                    run_id = EXCLUDED.run_id,
                    updated_at = EXCLUDED.updated_at,
                    slot_date = EXCLUDED.slot_date
                WHERE slot_availability.updated_at < EXCLUDED.updated_at
                ",
            )
            .bind(bucket_id)
            .bind(&slot.slot_id)
            .bind(now)
            .bind(&slot.venue_id)
            .bind(&slot.venue_name)
            .bind(payload)
            .bind(run_id)
            .bind(slot_date)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Closure step (step 10): for every open row in `bucket_id` whose
    /// `slot_id` is not in `curr_set`, transitions it to `closed` and
    /// returns the closed slot ids for the caller to stage for aggregation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn close_missing(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        curr_set: &BTreeSet<String>,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let open_rows = sqlx::query(
            "SELECT slot_id FROM slot_availability WHERE bucket_id = $1 AND state = 'open'",
        )
        .bind(bucket_id)
        .fetch_all(&mut **tx)
        .await?;

        let closed_slot_ids: Vec<String> = open_rows
            .into_iter()
            .map(|row| row.get::<String, _>("slot_id"))
            .filter(|sid| !curr_set.contains(sid))
            .collect();

        for slot_id in &closed_slot_ids {
            sqlx::query(
                r"
                UPDATE slot_availability
                SET state = 'closed', closed_at = $3, last_seen_at = $3,
                    run_id = $4, updated_at = $3
                WHERE bucket_id = $1 AND slot_id = $2
                ",
            )
            .bind(bucket_id)
            .bind(slot_id)
            .bind(now)
            .bind(run_id)
            .execute(&mut **tx)
            .await?;
        }

        Ok(closed_slot_ids)
    }

    /// Deletes stale projection rows from buckets that fell out of the
    /// window, per the retention job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn prune_before_bucket(&self, window_start_bucket_id: &str) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM slot_availability WHERE bucket_id < $1")
                .bind(window_start_bucket_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
