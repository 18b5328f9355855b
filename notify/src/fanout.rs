//! Notification Fan-out (component F): drains unsent drop events, filters
//! by recipient notify-set, sends push/email, and stamps `push_sent_at`.

use crate::notify_set::{compute_notify_set, matches_notify_set, DEFAULT_RECIPIENT_ID};
use crate::transport::{DigestEntry, EmailTransport, PushTransport};
use std::sync::Arc;
use tablewatch_core::clock::Clock;
use tablewatch_core::config::Config;
use tablewatch_runtime::metrics::NotifyMetrics;
use tablewatch_store::Stores;

/// Outcome of one fan-out pass, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct FanoutReport {
    /// Drop events evaluated against the notify set this pass.
    pub evaluated: usize,
    /// Of those, how many matched the notify set and were dispatched.
    pub matched: usize,
    /// Durable `UserNotification` rows written.
    pub notifications_written: usize,
}

/// Drains unsent drop events and fans them out over configured transports.
pub struct FanoutJob {
    stores: Arc<Stores>,
    clock: Arc<dyn Clock>,
    push_window: chrono::Duration,
    email: Option<Arc<dyn EmailTransport>>,
    recipient_email: Option<String>,
    push: Option<Arc<dyn PushTransport>>,
}

impl FanoutJob {
    /// Builds a fan-out job. `email`/`push` may be `None` if no transport is
    /// configured; unsent rows are still stamped so the queue drains.
    #[must_use]
    pub fn new(
        stores: Arc<Stores>,
        clock: Arc<dyn Clock>,
        push_window: chrono::Duration,
        email: Option<Arc<dyn EmailTransport>>,
        recipient_email: Option<String>,
        push: Option<Arc<dyn PushTransport>>,
    ) -> Self {
        Self {
            stores,
            clock,
            push_window,
            email,
            recipient_email,
            push,
        }
    }

    /// Runs exactly one fan-out pass.
    pub async fn run_once(&self) -> FanoutReport {
        match self.run_once_inner().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "notification fan-out pass failed");
                FanoutReport::default()
            },
        }
    }

    async fn run_once_inner(&self) -> Result<FanoutReport, tablewatch_store::StoreError> {
        let now = self.clock.now();

        // Read the batch under its own short transaction; released before
        // any network I/O so a slow transport never holds a pooled
        // connection (SPEC suspension-point requirement).
        let mut select_tx = self.stores.pool.begin().await?;
        let rows = self
            .stores
            .drops
            .select_unpushed(&mut select_tx, now, self.push_window, 100)
            .await?;
        select_tx.commit().await?;

        if rows.is_empty() {
            return Ok(FanoutReport::default());
        }

        let (includes, excludes) = self.stores.notify.preferences_for(DEFAULT_RECIPIENT_ID).await?;
        let notify_set = compute_notify_set(&includes, &excludes);

        let mut matched_entries = Vec::new();
        let mut notifications_written = 0usize;

        for row in &rows {
            let Some(venue_name) = row.venue_name.as_deref() else {
                continue;
            };
            if !matches_notify_set(venue_name, &notify_set) {
                continue;
            }
            let entry = DigestEntry {
                venue_name: venue_name.to_string(),
                venue_id: row.venue_id.clone().unwrap_or_default(),
                payload: row.payload_json.clone().unwrap_or(serde_json::Value::Null),
            };

            let metadata = serde_json::json!({
                "venue_id": entry.venue_id,
                "venue_name": entry.venue_name,
                "opened_at": row.opened_at,
            });
            self.stores
                .notify
                .insert_user_notification(DEFAULT_RECIPIENT_ID, "new_drop", &metadata)
                .await?;
            notifications_written += 1;

            matched_entries.push(entry);
        }

        self.send_digest(&matched_entries).await;
        self.send_push(&matched_entries).await;

        // Stamp the whole evaluated batch under its own transaction, opened
        // only after every transport send has already returned.
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut mark_tx = self.stores.pool.begin().await?;
        self.stores.drops.mark_pushed(&mut mark_tx, &ids, now).await?;
        mark_tx.commit().await?;

        NotifyMetrics::record_pushed(ids.len() as u64);

        Ok(FanoutReport {
            evaluated: rows.len(),
            matched: matched_entries.len(),
            notifications_written,
        })
    }

    async fn send_digest(&self, entries: &[DigestEntry]) {
        if entries.is_empty() {
            return;
        }
        let (Some(email), Some(to)) = (&self.email, &self.recipient_email) else {
            return;
        };
        if let Err(e) = email.send_digest(to, entries) {
            tracing::warn!(error = %e, "email digest send failed, drop events still stamped");
            NotifyMetrics::record_send_error();
        }
    }

    async fn send_push(&self, entries: &[DigestEntry]) {
        if entries.is_empty() {
            return;
        }
        let Some(push) = &self.push else {
            return;
        };
        let tokens = match self.stores.notify.list_push_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list push tokens");
                return;
            },
        };
        for token in &tokens {
            for entry in entries {
                if let Err(e) = push.send(token, entry).await {
                    tracing::warn!(error = %e, device_token = %token, "push send failed, drop event still stamped");
                    NotifyMetrics::record_send_error();
                }
            }
        }
    }

    /// Runs `run_once` once immediately, then on `config.notification_tick_period`,
    /// until `cancel` resolves.
    pub async fn run_periodic(self: Arc<Self>, config: Arc<Config>, cancel: impl std::future::Future<Output = ()>) {
        tokio::pin!(cancel);
        let mut interval = tokio::time::interval(config.notification_tick_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_once().await;
                    if report.matched > 0 {
                        tracing::info!(
                            evaluated = report.evaluated,
                            matched = report.matched,
                            notifications_written = report.notifications_written,
                            "notification fan-out pass complete"
                        );
                    }
                }
                () = &mut cancel => {
                    tracing::info!("notification job received shutdown signal, stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_empty() {
        assert_eq!(FanoutReport::default().evaluated, 0);
    }
}
