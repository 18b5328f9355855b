//! Environment-driven configuration for the discovery engine.
//!
//! Mirrors the upstream service's env-parsing approach (clamp numeric knobs
//! to a sane range rather than rejecting out-of-range input outright) but
//! expressed as a validated Rust struct assembled once at startup.

use chrono_tz::Tz;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while assembling [`Config`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable was missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// A variable was present but failed to parse.
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value read from the environment.
        value: String,
        /// Why parsing/validation failed.
        reason: String,
    },
}

/// Validated engine configuration, assembled once at process startup via
/// [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// IANA timezone used to compute the rolling window's calendar start.
    pub date_timezone: Tz,
    /// Number of days the rolling window covers (clamped 1-14).
    pub window_days: u32,
    /// Anchor times polled within each day, e.g. `["15:00", "20:30"]`.
    pub time_slots: Vec<String>,
    /// Party sizes queried against the provider.
    pub party_sizes: Vec<u32>,
    /// Maximum buckets polled concurrently (clamped 1-28).
    pub max_concurrent_buckets: usize,
    /// Cooldown applied to a bucket after it completes a poll (clamped 5-300s).
    pub bucket_cooldown: Duration,
    /// Scheduler tick period (clamped 1-60s).
    pub tick_period: Duration,
    /// TTL dedupe window for re-emerging slots (clamped 5-1440 minutes).
    pub notified_dedupe: Duration,
    /// Retention window for pushed+closed drop events (clamped 7-30 days).
    pub drop_events_retention_days: u32,
    /// Provider pagination size (clamped 20-200).
    pub provider_per_page: u32,
    /// Provider max pages fetched per bucket poll (clamped 1-10).
    pub provider_max_pages: u32,
    /// Push notification lookback window (default 15 minutes).
    pub push_window: Duration,
    /// Notification fan-out tick period (default 60s).
    pub notification_tick_period: Duration,
    /// Retention window for venue/market metrics rows (default 90 days).
    pub metrics_retention_days: u32,
    /// Retention window for venue rows (default 90 days).
    pub venues_retention_days: u32,
    /// Retention window for durable user notifications (default 30 days).
    pub notifications_retention_days: u32,
    /// Postgres connection string.
    pub database_url: String,
    /// Max sqlx pool connections.
    pub database_max_connections: u32,
}

impl Config {
    /// Assembles configuration from environment variables, applying the
    /// same defaults and clamps documented in the configuration surface.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset, or
    /// [`ConfigError::Invalid`] if a variable is present but malformed
    /// (e.g. `DISCOVERY_DATE_TIMEZONE` is not a valid IANA name).
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let date_timezone = parse_tz(
            "DISCOVERY_DATE_TIMEZONE",
            &env_or("DISCOVERY_DATE_TIMEZONE", "America/New_York"),
        )?;

        let config = Self {
            date_timezone,
            window_days: clamp_int("DISCOVERY_WINDOW_DAYS", 14, 1, 14)?,
            time_slots: env_list_str("DISCOVERY_TIME_SLOTS", &["15:00", "19:00"]),
            party_sizes: env_list_u32("DISCOVERY_PARTY_SIZES", &[2, 4]),
            max_concurrent_buckets: clamp_int("DISCOVERY_MAX_CONCURRENT_BUCKETS", 7, 1, 28)?
                as usize,
            bucket_cooldown: Duration::from_secs(u64::from(clamp_int(
                "DISCOVERY_BUCKET_COOLDOWN_SECONDS",
                10,
                5,
                300,
            )?)),
            tick_period: Duration::from_secs(u64::from(clamp_int(
                "DISCOVERY_TICK_SECONDS",
                2,
                1,
                60,
            )?)),
            notified_dedupe: Duration::from_secs(
                u64::from(clamp_int("DISCOVERY_NOTIFIED_DEDUPE_MINUTES", 30, 5, 1440)?) * 60,
            ),
            drop_events_retention_days: clamp_int("DISCOVERY_DROP_EVENTS_RETENTION_DAYS", 7, 7, 30)?,
            provider_per_page: clamp_int("DISCOVERY_RESY_PER_PAGE", 100, 20, 200)?,
            provider_max_pages: clamp_int("DISCOVERY_RESY_MAX_PAGES", 5, 1, 10)?,
            push_window: Duration::from_secs(
                u64::from(clamp_int("DISCOVERY_PUSH_WINDOW_MINUTES", 15, 1, 1440)?) * 60,
            ),
            notification_tick_period: Duration::from_secs(u64::from(clamp_int(
                "DISCOVERY_NOTIFICATION_TICK_SECONDS",
                60,
                5,
                3600,
            )?)),
            metrics_retention_days: clamp_int("DISCOVERY_METRICS_RETENTION_DAYS", 90, 1, 3650)?,
            venues_retention_days: clamp_int("DISCOVERY_VENUES_RETENTION_DAYS", 90, 1, 3650)?,
            notifications_retention_days: clamp_int(
                "DISCOVERY_NOTIFICATIONS_RETENTION_DAYS",
                30,
                1,
                3650,
            )?,
            database_url,
            database_max_connections: clamp_int("DATABASE_MAX_CONNECTIONS", 10, 1, 100)?,
        };

        config.warn_if_dedupe_too_short();
        Ok(config)
    }

    /// Startup policy check (Open Question b in the design notes): dedupe
    /// TTL shorter than twice the cooldown lets the same slot re-emit as a
    /// "new" drop on the very next poll. Not a hard error since short-lived
    /// test deployments may intend this.
    fn warn_if_dedupe_too_short(&self) {
        if self.notified_dedupe < self.bucket_cooldown * 2 {
            tracing::warn!(
                dedupe_secs = self.notified_dedupe.as_secs(),
                cooldown_secs = self.bucket_cooldown.as_secs(),
                "NOTIFIED_DEDUPE_MINUTES is less than twice BUCKET_COOLDOWN_SECONDS; \
                 re-emerging slots may be reported as new drops"
            );
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_tz(name: &'static str, raw: &str) -> Result<Tz, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "not a recognized IANA timezone".to_string(),
    })
}

fn clamp_int(name: &'static str, default: u32, min: u32, max: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let parsed: i64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: "not an integer".to_string(),
            })?;
            Ok(parsed.clamp(i64::from(min), i64::from(max)) as u32)
        },
    }
}

fn env_list_str(name: &str, default: &[&str]) -> Vec<String> {
    env::var(name).map_or_else(
        |_| default.iter().map(|s| (*s).to_string()).collect(),
        |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        },
    )
}

fn env_list_u32(name: &str, default: &[u32]) -> Vec<u32> {
    env::var(name).map_or_else(
        || default.to_vec(),
        |raw| {
            raw.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_int_defaults_when_unset() {
        // SAFETY-equivalent: tests run single-threaded per-process for env vars they touch.
        let v = clamp_int("TABLEWATCH_TEST_UNSET_VAR", 14, 1, 14).unwrap();
        assert_eq!(v, 14);
    }

    #[test]
    fn env_list_str_falls_back_to_default() {
        let v = env_list_str("TABLEWATCH_TEST_UNSET_LIST", &["15:00", "19:00"]);
        assert_eq!(v, vec!["15:00".to_string(), "19:00".to_string()]);
    }

    #[test]
    fn parse_tz_rejects_garbage() {
        let result = parse_tz("DISCOVERY_DATE_TIMEZONE", "Not/AZone");
        assert!(result.is_err());
    }
}
