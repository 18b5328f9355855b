//! Venue/market/rolling metrics: the aggregation tables written on slot
//! closure and periodically rebuilt over a trailing window.

use crate::error::StoreError;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

/// One per-venue, per-day aggregate row.
#[derive(Debug, Clone)]
pub struct VenueMetricsRow {
    /// Venue id.
    pub venue_id: String,
    /// Calendar day the metrics cover.
    pub window_date: NaiveDate,
    /// Slots newly opened that day.
    pub new_drop_count: i32,
    /// Slots closed that day.
    pub closed_count: i32,
    /// Running average duration in seconds across closed slots that day.
    pub avg_drop_duration_seconds: Option<f64>,
    /// Scarcity score, see the poll worker's scoring formula.
    pub scarcity_score: Option<f64>,
}

/// One rolling-window summary row for a venue.
#[derive(Debug, Clone)]
pub struct VenueRollingMetricsRow {
    /// Venue id.
    pub venue_id: String,
    /// The date the rebuild ran as-of.
    pub as_of_date: NaiveDate,
    /// Drops in the most recent 7 days of the window.
    pub total_last_7d: i32,
    /// Drops in the 7 days before that.
    pub total_prev_7d: i32,
    /// Average drops per day over the rolling window.
    pub drop_frequency_per_day: f64,
    /// Rarity score, see [`rarity_score`](tablewatch_core) conventions.
    pub rarity_score: f64,
    /// Percent change between the last and previous 7-day windows.
    pub trend_pct: Option<f64>,
}

/// Postgres-backed store for the metrics tables.
pub struct MetricsStore {
    pool: PgPool,
}

impl MetricsStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Increments the per-venue, per-day new-drop counter (called once per
    /// emitted drop event, independent of the closure aggregator).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn record_new_drop(
        &self,
        venue_id: &str,
        venue_name: Option<&str>,
        window_date: NaiveDate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO venue_metrics (venue_id, venue_name, window_date, new_drop_count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (venue_id, window_date) DO UPDATE SET
                new_drop_count = venue_metrics.new_drop_count + 1,
                venue_name = COALESCE(EXCLUDED.venue_name, venue_metrics.venue_name)
            ",
        )
        .bind(venue_id)
        .bind(venue_name)
        .bind(window_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Incrementally folds a closed slot's duration into the venue's daily
    /// aggregate (incremental part of step 12), recomputing `scarcity_score`
    /// from the updated running average and closed count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn record_closure(
        &self,
        venue_id: &str,
        venue_name: Option<&str>,
        window_date: NaiveDate,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO venue_metrics
                (venue_id, venue_name, window_date, closed_count, avg_drop_duration_seconds)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (venue_id, window_date) DO UPDATE SET
                venue_name = COALESCE(EXCLUDED.venue_name, venue_metrics.venue_name),
                avg_drop_duration_seconds = (
                    COALESCE(venue_metrics.avg_drop_duration_seconds, 0)
                        * venue_metrics.closed_count + $4
                ) / (venue_metrics.closed_count + 1),
                closed_count = venue_metrics.closed_count + 1
            ",
        )
        .bind(venue_id)
        .bind(venue_name)
        .bind(window_date)
        .bind(duration_seconds as f64)
        .execute(&self.pool)
        .await?;

        self.recompute_scarcity(venue_id, window_date).await
    }

    async fn recompute_scarcity(
        &self,
        venue_id: &str,
        window_date: NaiveDate,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            "SELECT avg_drop_duration_seconds, closed_count, new_drop_count FROM venue_metrics \
             WHERE venue_id = $1 AND window_date = $2",
        )
        .bind(venue_id)
        .bind(window_date)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(()) };
        let avg_duration_sec: Option<f64> = row.get("avg_drop_duration_seconds");
        let closed_count: i32 = row.get("closed_count");
        let new_drop_count: i32 = row.get("new_drop_count");

        let score = scarcity_score(avg_duration_sec, closed_count, new_drop_count);

        sqlx::query(
            "UPDATE venue_metrics SET scarcity_score = $3 WHERE venue_id = $1 AND window_date = $2",
        )
        .bind(venue_id)
        .bind(window_date)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rebuilds `venue_rolling_metrics` for every venue with activity in the
    /// trailing `window_days`, bounded by `max_venues` so the rebuild never
    /// becomes an unbounded full-table scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the read or upsert fails.
    pub async fn rebuild_rolling_metrics(
        &self,
        as_of_date: NaiveDate,
        window_days: u32,
        max_venues: i64,
    ) -> Result<usize, StoreError> {
        let window_start = as_of_date - chrono::Duration::days(i64::from(window_days));
        let mid = as_of_date - chrono::Duration::days(7);

        let rows = sqlx::query(
            r"
            SELECT venue_id, MAX(venue_name) AS venue_name,
                   COALESCE(SUM(new_drop_count), 0)::INTEGER AS total,
                   COALESCE(SUM(new_drop_count) FILTER (WHERE window_date > $3), 0)::INTEGER AS last_7d,
                   COALESCE(SUM(new_drop_count) FILTER (WHERE window_date <= $3), 0)::INTEGER AS prev_7d
            FROM venue_metrics
            WHERE window_date >= $1 AND window_date <= $2
            GROUP BY venue_id
            ORDER BY total DESC
            LIMIT $4
            ",
        )
        .bind(window_start)
        .bind(as_of_date)
        .bind(mid)
        .bind(max_venues)
        .fetch_all(&self.pool)
        .await?;

        let mut updated = 0usize;
        for row in rows {
            let venue_id: String = row.get("venue_id");
            let venue_name: Option<String> = row.get("venue_name");
            let total: i32 = row.get("total");
            let last_7d: i32 = row.get("last_7d");
            let prev_7d: i32 = row.get("prev_7d");

            let drop_frequency_per_day = f64::from(total) / f64::from(window_days.max(1));
            let rarity = rarity_score(total, window_days);
            let trend_pct = if prev_7d > 0 {
                Some(f64::from(last_7d - prev_7d) / f64::from(prev_7d))
            } else {
                None
            };

            sqlx::query(
                r"
                INSERT INTO venue_rolling_metrics
                    (venue_id, venue_name, as_of_date, window_days, total_new_drops,
                     total_last_7d, total_prev_7d, drop_frequency_per_day, rarity_score, trend_pct)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (venue_id, as_of_date) DO UPDATE SET
                    venue_name = EXCLUDED.venue_name,
                    window_days = EXCLUDED.window_days,
                    total_new_drops = EXCLUDED.total_new_drops,
                    total_last_7d = EXCLUDED.total_last_7d,
                    total_prev_7d = EXCLUDED.total_prev_7d,
                    drop_frequency_per_day = EXCLUDED.drop_frequency_per_day,
                    rarity_score = EXCLUDED.rarity_score,
                    trend_pct = EXCLUDED.trend_pct,
                    computed_at = now()
                ",
            )
            .bind(&venue_id)
            .bind(&venue_name)
            .bind(as_of_date)
            .bind(i32::try_from(window_days).unwrap_or(14))
            .bind(total)
            .bind(last_7d)
            .bind(prev_7d)
            .bind(drop_frequency_per_day)
            .bind(rarity)
            .bind(trend_pct)
            .execute(&self.pool)
            .await?;
            updated += 1;
        }

        Ok(updated)
    }

    /// Writes (upserts) one market-wide metric row keyed by
    /// `(window_date, metric_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn upsert_market_metric(
        &self,
        window_date: NaiveDate,
        metric_type: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO market_metrics (window_date, metric_type, value_json)
            VALUES ($1, $2, $3)
            ON CONFLICT (window_date, metric_type) DO UPDATE SET
                value_json = EXCLUDED.value_json,
                computed_at = now()
            ",
        )
        .bind(window_date)
        .bind(metric_type)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes metrics rows older than `cutoff` (retention job).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if either delete fails.
    pub async fn prune_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        let venue = sqlx::query("DELETE FROM venue_metrics WHERE window_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let market = sqlx::query("DELETE FROM market_metrics WHERE window_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let rolling = sqlx::query("DELETE FROM venue_rolling_metrics WHERE as_of_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(venue + market + rolling)
    }
}

/// `clip(100, 0.33·100/(1+avg_duration_sec/60) + 0.66·50·min(closed_count/10, 1) + 34/(1+new_drop_count))`.
///
/// Lower average duration and fewer new drops push the score up; more
/// closures in the window push it up too, saturating once `closed_count`
/// reaches 10.
#[must_use]
pub fn scarcity_score(avg_duration_sec: Option<f64>, closed_count: i32, new_drop_count: i32) -> f64 {
    let duration_term = 0.33 * 100.0 / (1.0 + avg_duration_sec.unwrap_or(0.0) / 60.0);
    let closed_term = 0.66 * 50.0 * (f64::from(closed_count) / 10.0).min(1.0);
    let drop_term = 34.0 / (1.0 + f64::from(new_drop_count));
    (duration_term + closed_term + drop_term).min(100.0)
}

/// `100 / (1 + total_drops/window_days)`. Venues that rarely open score
/// close to 100; venues that open constantly approach 0.
#[must_use]
pub fn rarity_score(total_drops: i32, window_days: u32) -> f64 {
    100.0 / (1.0 + f64::from(total_drops) / f64::from(window_days.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scarcity_score_is_monotone_in_duration() {
        let short = scarcity_score(Some(60.0), 5, 2);
        let long = scarcity_score(Some(600.0), 5, 2);
        assert!(short > long);
    }

    #[test]
    fn scarcity_score_saturates_at_100() {
        let score = scarcity_score(Some(0.0), 100, 0);
        assert!(score <= 100.0);
    }

    #[test]
    fn rarity_score_is_monotone_in_drops() {
        let rare = rarity_score(1, 14);
        let common = rarity_score(50, 14);
        assert!(rare > common);
    }
}
