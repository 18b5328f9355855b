//! Bucket Store (component B): CRUD over `discovery_buckets` plus window
//! maintenance.

use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tablewatch_core::domain::{window_bucket_ids, BucketId};

/// A loaded bucket row. `baseline_slot_ids`/`prev_slot_ids` are `None` until
/// the bucket's first successful poll.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// The bucket's identity.
    pub bucket_id: BucketId,
    /// Slot ids observed on the first successful poll; never changes after.
    pub baseline_slot_ids: Option<Vec<String>>,
    /// Slot ids observed on the most recent successful poll.
    pub prev_slot_ids: Option<Vec<String>>,
    /// When the bucket was last successfully polled.
    pub scanned_at: Option<DateTime<Utc>>,
}

/// Postgres-backed store for [`Bucket`] rows.
pub struct BucketStore {
    pool: PgPool,
}

impl BucketStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotently inserts any bucket row missing for `(day, anchor)` pairs
    /// in the window starting at `start_date` spanning `window_days` days
    /// across `anchors`. Returns the bucket ids actually created, so the
    /// caller can run a baseline poll against each before the next regular
    /// tick reaches it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn ensure_buckets(
        &self,
        start_date: NaiveDate,
        window_days: u32,
        anchors: &[String],
    ) -> Result<Vec<(BucketId, String, String)>, StoreError> {
        let ids = window_bucket_ids(start_date, window_days, anchors);
        let mut created = Vec::new();
        for (bucket_id, date_str, time_slot) in ids {
            let result = sqlx::query(
                r"
                INSERT INTO discovery_buckets (bucket_id, date_str, time_slot)
                VALUES ($1, $2, $3)
                ON CONFLICT (bucket_id) DO NOTHING
                ",
            )
            .bind(bucket_id.as_str())
            .bind(date_str.as_str())
            .bind(time_slot.as_str())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() > 0 {
                created.push((bucket_id, date_str, time_slot));
            }
        }
        if !created.is_empty() {
            tracing::debug!(inserted = created.len(), "ensure_buckets created new bucket rows");
        }
        Ok(created)
    }

    /// Enumerates every bucket id currently in the window, regardless of
    /// whether it has a row yet (the scheduler uses this to detect which
    /// process-local state entries have fallen out of the window).
    #[must_use]
    pub fn window_bucket_ids(
        start_date: NaiveDate,
        window_days: u32,
        anchors: &[String],
    ) -> Vec<BucketId> {
        window_bucket_ids(start_date, window_days, anchors)
            .into_iter()
            .map(|(id, _, _)| id)
            .collect()
    }

    /// Loads one bucket row by id, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get(&self, bucket_id: &str) -> Result<Option<Bucket>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT bucket_id, date_str, time_slot, baseline_slot_ids, prev_slot_ids, scanned_at
            FROM discovery_buckets
            WHERE bucket_id = $1
            ",
        )
        .bind(bucket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_bucket(&row)).transpose()
    }

    /// Loads a bucket row for update inside the caller's transaction,
    /// locking it against concurrent writers (`FOR UPDATE`). Assumes the
    /// caller already holds the per-bucket advisory lock; this row lock is
    /// belt-and-suspenders against a second connection in the same process.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
    ) -> Result<Option<Bucket>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT bucket_id, date_str, time_slot, baseline_slot_ids, prev_slot_ids, scanned_at
            FROM discovery_buckets
            WHERE bucket_id = $1
            FOR UPDATE
            ",
        )
        .bind(bucket_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|row| Self::row_to_bucket(&row)).transpose()
    }

    /// Inserts a brand-new bucket row with `baseline = prev = curr_set`,
    /// used on the bootstrap path (row missing or `baseline_slot_ids` null).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn bootstrap(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        date_str: &str,
        time_slot: &str,
        curr_set: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let curr_json = serde_json::to_value(curr_set)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO discovery_buckets
                (bucket_id, date_str, time_slot, baseline_slot_ids, prev_slot_ids, scanned_at)
            VALUES ($1, $2, $3, $4, $4, $5)
            ON CONFLICT (bucket_id) DO UPDATE SET
                baseline_slot_ids = EXCLUDED.baseline_slot_ids,
                prev_slot_ids = EXCLUDED.prev_slot_ids,
                scanned_at = EXCLUDED.scanned_at
            WHERE discovery_buckets.baseline_slot_ids IS NULL
            ",
        )
        .bind(bucket_id)
        .bind(date_str)
        .bind(time_slot)
        .bind(curr_json)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Persists `prev_slot_ids := sorted(curr_set)` and `scanned_at := now`
    /// after a normal (non-bootstrap) poll completes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn record_poll(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bucket_id: &str,
        curr_set: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut sorted = curr_set.to_vec();
        sorted.sort_unstable();
        let curr_json =
            serde_json::to_value(&sorted).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            UPDATE discovery_buckets
            SET prev_slot_ids = $2, scanned_at = $3
            WHERE bucket_id = $1
            ",
        )
        .bind(bucket_id)
        .bind(curr_json)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Deletes bucket rows whose `date_str` predates `window_start`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn prune_before(&self, window_start: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM discovery_buckets WHERE date_str < $1")
            .bind(window_start.format("%Y-%m-%d").to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_bucket(row: &sqlx::postgres::PgRow) -> Result<Bucket, StoreError> {
        let date_str: String = row.get("date_str");
        let time_slot: String = row.get("time_slot");
        let baseline_json: Option<serde_json::Value> = row.get("baseline_slot_ids");
        let prev_json: Option<serde_json::Value> = row.get("prev_slot_ids");

        let parse_ids = |v: Option<serde_json::Value>| -> Result<Option<Vec<String>>, StoreError> {
            v.map(|v| serde_json::from_value(v).map_err(|e| StoreError::Serialization(e.to_string())))
                .transpose()
        };

        Ok(Bucket {
            bucket_id: BucketId::new(date_str, time_slot),
            baseline_slot_ids: parse_ids(baseline_json)?,
            prev_slot_ids: parse_ids(prev_json)?,
            scanned_at: row.get("scanned_at"),
        })
    }
}
