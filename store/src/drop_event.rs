//! Drop event log (`DropEvent`): the append-only record of genuinely new
//! slot openings, consumed by the notification fan-out.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tablewatch_core::domain::{dedupe_key, NormalizedSlot};

/// One row read back from `drop_events`.
#[derive(Debug, Clone)]
pub struct DropEventRow {
    /// Row id.
    pub id: i64,
    /// Owning bucket.
    pub bucket_id: String,
    /// The slot that opened.
    pub slot_id: String,
    /// When the drop was first observed.
    pub opened_at: DateTime<Utc>,
    /// Venue id, denormalized.
    pub venue_id: Option<String>,
    /// Venue name, denormalized.
    pub venue_name: Option<String>,
    /// Provider payload, denormalized.
    pub payload_json: Option<serde_json::Value>,
    /// When the notification fan-out stamped this row as sent.
    pub push_sent_at: Option<DateTime<Utc>>,
}

/// Postgres-backed store for `drop_events`.
pub struct DropEventStore {
    pool: PgPool,
}

impl DropEventStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// TTL dedupe query (step 6): slot ids with a `drop_events` row in
    /// `bucket_id` whose `opened_at` is within `dedupe_window` of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn recently_notified(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        now: DateTime<Utc>,
        dedupe_window: chrono::Duration,
    ) -> Result<BTreeSet<String>, StoreError> {
        let since = now - dedupe_window;
        let rows = sqlx::query(
            "SELECT slot_id FROM drop_events WHERE bucket_id = $1 AND opened_at >= $2",
        )
        .bind(bucket_id)
        .bind(since)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("slot_id"))
            .collect())
    }

    /// Inserts one drop event per slot in `drops_to_emit` (step 8).
    /// Conflicts on `dedupe_key` are silently dropped, making this idempotent
    /// under worker retry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if an insert fails for a reason
    /// other than the dedupe-key conflict.
    pub async fn insert_drops(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        drops_to_emit: &[&NormalizedSlot],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut inserted = 0usize;
        for slot in drops_to_emit {
            let key = dedupe_key(bucket_id, &slot.slot_id, now);
            let payload = serde_json::to_value(&slot.payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            let result = sqlx::query(
                r"
                INSERT INTO drop_events
                    (bucket_id, slot_id, opened_at, venue_id, venue_name, payload_json, dedupe_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (dedupe_key) DO NOTHING
                ",
            )
            .bind(bucket_id)
            .bind(&slot.slot_id)
            .bind(now)
            .bind(&slot.venue_id)
            .bind(&slot.venue_name)
            .bind(payload)
            .bind(&key)
            .execute(&mut **tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    /// Deletes drop events for `(bucket, slot)` pairs that just closed and
    /// already have `push_sent_at` set (step 10, bounded growth).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn delete_closed_and_pushed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        closed_slot_ids: &[String],
    ) -> Result<u64, StoreError> {
        if closed_slot_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r"
            DELETE FROM drop_events
            WHERE bucket_id = $1 AND slot_id = ANY($2) AND push_sent_at IS NOT NULL
            ",
        )
        .bind(bucket_id)
        .bind(closed_slot_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Selects up to `limit` unpushed drop events opened within `window` of
    /// `now`, oldest first, for the notification fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn select_unpushed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        now: DateTime<Utc>,
        window: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<DropEventRow>, StoreError> {
        let since = now - window;
        let rows = sqlx::query(
            r"
            SELECT id, bucket_id, slot_id, opened_at, venue_id, venue_name, payload_json, push_sent_at
            FROM drop_events
            WHERE push_sent_at IS NULL AND opened_at >= $1
            ORDER BY opened_at ASC
            LIMIT $2
            ",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_drop_event).collect())
    }

    /// Stamps `push_sent_at := now` for the given row ids (step 4 of the
    /// fan-out).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_pushed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE drop_events SET push_sent_at = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Deletes drop events whose bucket fell out of the window, or whose
    /// `opened_at` predates the configured retention and have already been
    /// pushed (retention job, two passes).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if either delete fails.
    pub async fn prune(
        &self,
        window_start_bucket_id: &str,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Result<u64, StoreError> {
        let by_window = sqlx::query("DELETE FROM drop_events WHERE bucket_id < $1")
            .bind(window_start_bucket_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let cutoff = now - retention;
        let by_age = sqlx::query(
            "DELETE FROM drop_events WHERE opened_at < $1 AND push_sent_at IS NOT NULL",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(by_window + by_age)
    }

    fn row_to_drop_event(row: sqlx::postgres::PgRow) -> DropEventRow {
        DropEventRow {
            id: row.get("id"),
            bucket_id: row.get("bucket_id"),
            slot_id: row.get("slot_id"),
            opened_at: row.get("opened_at"),
            venue_id: row.get("venue_id"),
            venue_name: row.get("venue_name"),
            payload_json: row.get("payload_json"),
            push_sent_at: row.get("push_sent_at"),
        }
    }
}
