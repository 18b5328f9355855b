//! Read API (egress to external collaborators): the two query shapes an
//! HTTP layer or CLI built on top of this crate would call directly. Not
//! wrapped in a server here — that's out of scope — but both shapes are
//! bounded, reusable library functions over the store.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Hard server-side cap on projection rows scanned per read-API call.
const MAX_ROWS_SCANNED: i64 = 3000;
/// Hard cap on distinct venues returned per calendar date.
const MAX_VENUES_PER_DATE: usize = 500;

/// One venue entry in a read-API result, deduped per date.
#[derive(Debug, Clone)]
pub struct VenueAvailability {
    /// Calendar date the entry belongs to.
    pub slot_date: String,
    /// Venue id.
    pub venue_id: String,
    /// Venue name.
    pub venue_name: Option<String>,
    /// Most recent slot payload seen for this venue on this date.
    pub payload_json: Option<serde_json::Value>,
}

/// *just-opened*: slots with a `DropEvent.opened_at` within `since` of `now`
/// whose projection row is still `state=open`, grouped by date and deduped
/// per venue (first row wins per `(slot_date, venue_id)`).
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the query fails.
pub async fn just_opened(
    pool: &PgPool,
    now: DateTime<Utc>,
    since: chrono::Duration,
) -> Result<Vec<VenueAvailability>, StoreError> {
    let cutoff = now - since;
    let rows = sqlx::query(
        r"
        SELECT DISTINCT ON (sa.slot_date, sa.venue_id)
            sa.slot_date, sa.venue_id, sa.venue_name, sa.payload_json
        FROM slot_availability sa
        JOIN drop_events de ON de.bucket_id = sa.bucket_id AND de.slot_id = sa.slot_id
        WHERE sa.state = 'open' AND de.opened_at >= $1
        ORDER BY sa.slot_date, sa.venue_id, de.opened_at DESC
        LIMIT $2
        ",
    )
    .bind(cutoff)
    .bind(MAX_ROWS_SCANNED)
    .fetch_all(pool)
    .await?;

    Ok(cap_per_date(rows.into_iter().map(row_to_venue_availability).collect()))
}

/// *still-open*: projection rows with `state=open` whose `(bucket, slot)`
/// does NOT have a recent `DropEvent`, grouped by date and deduped per
/// venue.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the query fails.
pub async fn still_open(
    pool: &PgPool,
    now: DateTime<Utc>,
    recent_drop_window: chrono::Duration,
) -> Result<Vec<VenueAvailability>, StoreError> {
    let cutoff = now - recent_drop_window;
    let rows = sqlx::query(
        r"
        SELECT DISTINCT ON (sa.slot_date, sa.venue_id)
            sa.slot_date, sa.venue_id, sa.venue_name, sa.payload_json
        FROM slot_availability sa
        WHERE sa.state = 'open'
          AND NOT EXISTS (
              SELECT 1 FROM drop_events de
              WHERE de.bucket_id = sa.bucket_id AND de.slot_id = sa.slot_id
                AND de.opened_at >= $1
          )
        ORDER BY sa.slot_date, sa.venue_id, sa.last_seen_at DESC
        LIMIT $2
        ",
    )
    .bind(cutoff)
    .bind(MAX_ROWS_SCANNED)
    .fetch_all(pool)
    .await?;

    Ok(cap_per_date(rows.into_iter().map(row_to_venue_availability).collect()))
}

fn row_to_venue_availability(row: sqlx::postgres::PgRow) -> VenueAvailability {
    VenueAvailability {
        slot_date: row.get::<Option<String>, _>("slot_date").unwrap_or_default(),
        venue_id: row.get::<Option<String>, _>("venue_id").unwrap_or_default(),
        venue_name: row.get("venue_name"),
        payload_json: row.get("payload_json"),
    }
}

/// Enforces the per-date venue cap; the SQL already dedupes per
/// `(date, venue)`, this bounds cardinality within a single date.
fn cap_per_date(rows: Vec<VenueAvailability>) -> Vec<VenueAvailability> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    rows.into_iter()
        .filter(|row| {
            let count = counts.entry(row.slot_date.clone()).or_insert(0);
            *count += 1;
            *count <= MAX_VENUES_PER_DATE
        })
        .collect()
}
