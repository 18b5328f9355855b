//! Domain model: buckets, slots, and the identifiers derived from them.
//!
//! A [`BucketId`] names one `(calendar date, anchor time)` pair; it is the
//! unit the scheduler dispatches and the poll worker processes. A slot id
//! names one `(provider, venue, concrete time)` observation and is stable
//! across polls so set-diffing can detect additions and closures.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies a bucket: one calendar date crossed with one anchor time.
///
/// Formats as `"{date}_{anchor}"`, e.g. `"2026-02-14_20:30"`, matching the
/// on-disk primary key used by the bucket store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketId {
    date_str: String,
    time_slot: String,
}

impl BucketId {
    /// Builds a bucket id from a calendar date string (`YYYY-MM-DD`) and an
    /// anchor time string (`HH:MM`).
    #[must_use]
    pub fn new(date_str: String, time_slot: String) -> Self {
        Self { date_str, time_slot }
    }

    /// The calendar date component, e.g. `"2026-02-14"`.
    #[must_use]
    pub fn date_str(&self) -> &str {
        &self.date_str
    }

    /// The anchor time component, e.g. `"20:30"`.
    #[must_use]
    pub fn time_slot(&self) -> &str {
        &self.time_slot
    }

    /// Renders the canonical `"{date}_{anchor}"` string form.
    #[must_use]
    pub fn as_str(&self) -> String {
        format!("{}_{}", self.date_str, self.time_slot)
    }

    /// Parses a canonical `"{date}_{anchor}"` string back into its parts.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (date_str, time_slot) = raw.split_once('_')?;
        Some(Self::new(date_str.to_string(), time_slot.to_string()))
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.date_str, self.time_slot)
    }
}

/// A slot identifier: `SHA-256(provider || venue_id || actual_time)`
/// truncated to 32 hex characters. Stable across providers and polls.
pub type SlotId = String;

/// Computes the canonical slot id for a provider observation.
///
/// `actual_time` should be the concrete ISO-8601 slot start time; identity
/// is deliberately per `(venue, time)`, not per venue, since a venue may
/// have many concurrently-open slots in one bucket.
#[must_use]
pub fn slot_id(provider_id: &str, venue_id: &str, actual_time: &str) -> SlotId {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"|");
    hasher.update(venue_id.as_bytes());
    hasher.update(b"|");
    hasher.update(actual_time.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 32)
}

fn hex_prefix(bytes: &[u8], hex_len: usize) -> String {
    let mut out = String::with_capacity(hex_len);
    for byte in bytes {
        if out.len() >= hex_len {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(hex_len);
    out
}

/// Derives the per-bucket advisory lock key used to lease a bucket across
/// concurrent workers: `SHA-256(bucket_id)[:8 bytes]` as a big-endian `i64`
/// reduced into the signed 63-bit range `pg_try_advisory_xact_lock` accepts.
#[must_use]
pub fn advisory_lock_key(bucket_id: &str) -> i64 {
    let digest = Sha256::digest(bucket_id.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    let raw = u64::from_be_bytes(buf);
    (raw % (1u64 << 63)) as i64
}

/// A single normalized provider observation, the output contract of every
/// [`crate::domain`]-consuming provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSlot {
    /// Canonical slot id, see [`slot_id`].
    pub slot_id: SlotId,
    /// Provider-local venue identifier.
    pub venue_id: String,
    /// Human-readable venue name.
    pub venue_name: String,
    /// Arbitrary provider payload (availability times, book url, etc).
    pub payload: serde_json::Value,
}

impl NormalizedSlot {
    /// Extracts `payload.availability_times` as a list of strings, or an
    /// empty vec if absent or malformed.
    #[must_use]
    pub fn availability_times(&self) -> Vec<String> {
        self.payload
            .get("availability_times")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Computes the rolling window's start date (inclusive) in a configured IANA
/// timezone. Deliberately includes "yesterday" in that timezone so a user
/// west of UTC still sees today's calendar date once their local midnight
/// has not yet passed.
#[must_use]
pub fn window_start_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let local = now.with_timezone(&tz);
    local.date_naive() - chrono::Duration::days(1)
}

/// Enumerates every `(bucket_id, date_str, time_slot)` in the rolling
/// window starting at `start_date` for `window_days` days across the
/// configured `anchors`.
#[must_use]
pub fn window_bucket_ids(
    start_date: NaiveDate,
    window_days: u32,
    anchors: &[String],
) -> Vec<(BucketId, String, String)> {
    let mut out = Vec::with_capacity(window_days as usize * anchors.len());
    for day_offset in 0..window_days {
        let date = start_date + chrono::Duration::days(i64::from(day_offset));
        let date_str = date.format("%Y-%m-%d").to_string();
        for anchor in anchors {
            let bucket = BucketId::new(date_str.clone(), anchor.clone());
            out.push((bucket, date_str.clone(), anchor.clone()));
        }
    }
    out
}

/// Normalizes a venue name for fuzzy matching against notify preferences:
/// casefold plus whitespace collapse, matching the upstream `hotlist`
/// comparison semantics.
#[must_use]
pub fn normalize_venue_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Truncates a timestamp to the minute, used to build TTL dedupe keys.
#[must_use]
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        0,
    )
    .single()
    .unwrap_or(ts)
}

use chrono::{Datelike, Timelike};

/// Builds the unique dedupe key for a drop event:
/// `"{bucket_id}|{slot_id}|{opened_at truncated to minute, RFC3339}"`.
#[must_use]
pub fn dedupe_key(bucket_id: &str, slot_id: &str, opened_at: DateTime<Utc>) -> String {
    format!(
        "{bucket_id}|{slot_id}|{}",
        truncate_to_minute(opened_at).format("%Y-%m-%dT%H:%M")
    )
}

/// Partitions a set of [`SlotId`]s by the venue each one belongs to, given a
/// lookup from slot id to venue id. Used to compute "did this venue have any
/// availability in the previous observation" without a second query per slot.
#[must_use]
pub fn venues_for_slots<'a>(
    slots: impl Iterator<Item = &'a SlotId>,
    venue_of: &BTreeMap<SlotId, String>,
) -> std::collections::BTreeSet<String> {
    slots
        .filter_map(|sid| venue_of.get(sid).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_id_round_trips() {
        let b = BucketId::new("2026-02-14".to_string(), "20:30".to_string());
        assert_eq!(b.as_str(), "2026-02-14_20:30");
        let parsed = BucketId::parse("2026-02-14_20:30").unwrap();
        assert_eq!(parsed, b);
    }

    #[test]
    fn slot_id_is_32_hex_chars_and_stable() {
        let a = slot_id("resy", "venue-1", "2026-02-14T20:30:00Z");
        let b = slot_id("resy", "venue-1", "2026-02-14T20:30:00Z");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn slot_id_distinguishes_providers() {
        let resy = slot_id("resy", "venue-1", "2026-02-14T20:30:00Z");
        let opentable = slot_id("opentable", "venue-1", "2026-02-14T20:30:00Z");
        assert_ne!(resy, opentable);
    }

    #[test]
    fn advisory_lock_key_is_non_negative_and_deterministic() {
        let k1 = advisory_lock_key("2026-02-14_20:30");
        let k2 = advisory_lock_key("2026-02-14_20:30");
        assert_eq!(k1, k2);
        assert!(k1 >= 0);
    }

    #[test]
    fn window_bucket_ids_covers_days_times_anchors() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let anchors = vec!["15:00".to_string(), "20:30".to_string()];
        let ids = window_bucket_ids(start, 3, &anchors);
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0].0.as_str(), "2026-02-14_15:00");
        assert_eq!(ids[5].0.as_str(), "2026-02-16_20:30");
    }

    #[test]
    fn normalize_venue_name_collapses_whitespace_and_case() {
        assert_eq!(normalize_venue_name("  Le   Bernardin "), "le bernardin");
    }

    #[test]
    fn dedupe_key_is_stable_within_a_minute() {
        let t1 = Utc.with_ymd_and_hms(2026, 2, 14, 20, 30, 5).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 2, 14, 20, 30, 55).unwrap();
        let k1 = dedupe_key("b1", "s1", t1);
        let k2 = dedupe_key("b1", "s1", t2);
        assert_eq!(k1, k2);
    }
}
