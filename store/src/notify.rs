//! Push tokens, notify preferences, and the durable user-notification feed.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;

/// A registered push notification preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// Adds a venue to the recipient's notify set beyond the builtin hotlist.
    Include,
    /// Removes a venue from the recipient's notify set.
    Exclude,
}

impl Preference {
    /// Database string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "include" => Some(Self::Include),
            "exclude" => Some(Self::Exclude),
            _ => None,
        }
    }
}

/// Postgres-backed store for push tokens, notify preferences, and the
/// user-notification feed.
pub struct NotifyStore {
    pool: PgPool,
}

impl NotifyStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers (or refreshes) a device push token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn register_push_token(
        &self,
        device_token: &str,
        platform: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO push_tokens (device_token, platform, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (device_token) DO UPDATE SET
                platform = EXCLUDED.platform,
                updated_at = now()
            ",
        )
        .bind(device_token)
        .bind(platform)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lists every registered push token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_push_tokens(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT device_token FROM push_tokens")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("device_token"))
            .collect())
    }

    /// Sets a recipient's preference for a normalized venue name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn set_preference(
        &self,
        recipient_id: &str,
        venue_name_normalized: &str,
        preference: Preference,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO notify_preferences (recipient_id, venue_name_normalized, preference)
            VALUES ($1, $2, $3)
            ON CONFLICT (recipient_id, venue_name_normalized) DO UPDATE SET
                preference = EXCLUDED.preference
            ",
        )
        .bind(recipient_id)
        .bind(venue_name_normalized)
        .bind(preference.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads a recipient's include/exclude sets for notify-set computation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn preferences_for(
        &self,
        recipient_id: &str,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>), StoreError> {
        let rows = sqlx::query(
            "SELECT venue_name_normalized, preference FROM notify_preferences WHERE recipient_id = $1",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        let mut includes = BTreeSet::new();
        let mut excludes = BTreeSet::new();
        for row in rows {
            let name: String = row.get("venue_name_normalized");
            let pref: String = row.get("preference");
            match Preference::parse(&pref) {
                Some(Preference::Include) => {
                    includes.insert(name);
                },
                Some(Preference::Exclude) => {
                    excludes.insert(name);
                },
                None => {
                    tracing::warn!(recipient_id, pref, "unknown notify preference value");
                },
            }
        }
        Ok((includes, excludes))
    }

    /// Writes a durable, per-recipient notification row alongside the
    /// push/email send, independent of whether either transport is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn insert_user_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO user_notifications (recipient_id, kind, metadata)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(recipient_id)
        .bind(kind)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Marks a notification read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_read(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE user_notifications SET read_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes notifications older than `cutoff` (retention job).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
