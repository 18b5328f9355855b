//! Email and push transports. Both are optional: if neither is configured,
//! `FanoutJob` still stamps `push_sent_at` so the queue drains (component F,
//! step 3).

use crate::error::NotifyError;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;

/// One digest entry rendered into the email body / push payload.
#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    /// Venue display name.
    pub venue_name: String,
    /// Venue id (for dedupe/linking, not shown to the recipient).
    pub venue_id: String,
    /// Raw slot payload, as stored on the drop event.
    pub payload: serde_json::Value,
}

/// Sends an email digest of freshly opened slots.
pub trait EmailTransport: Send + Sync {
    /// Sends the digest to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Email`] if the send fails.
    fn send_digest(&self, to: &str, entries: &[DigestEntry]) -> Result<(), NotifyError>;
}

/// SMTP-backed [`EmailTransport`], grounded on the same Lettre usage as the
/// auth crate's `SmtpEmailProvider`.
#[derive(Clone)]
pub struct SmtpEmailTransport {
    smtp_server: String,
    smtp_port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpEmailTransport {
    /// Builds a transport over the given SMTP relay.
    #[must_use]
    pub fn new(
        smtp_server: String,
        smtp_port: u16,
        smtp_username: String,
        smtp_password: String,
        from_email: String,
        from_name: String,
    ) -> Self {
        Self {
            smtp_server,
            smtp_port,
            credentials: Credentials::new(smtp_username, smtp_password),
            from_email,
            from_name,
        }
    }

    fn render_html(entries: &[DigestEntry]) -> String {
        let rows: String = entries
            .iter()
            .map(|e| format!("<li><strong>{}</strong></li>", e.venue_name))
            .collect();
        format!(
            "<html><body><h2>New availability</h2><ul>{rows}</ul></body></html>",
        )
    }
}

impl EmailTransport for SmtpEmailTransport {
    fn send_digest(&self, to: &str, entries: &[DigestEntry]) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_email)
                    .parse()
                    .map_err(|e| NotifyError::Email(format!("invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::Email(format!("invalid to address: {e}")))?)
            .subject(format!("{} new openings", entries.len()))
            .header(ContentType::TEXT_HTML)
            .body(Self::render_html(entries))
            .map_err(|e| NotifyError::Email(format!("failed to build email: {e}")))?;

        let mailer = SmtpTransport::relay(&self.smtp_server)
            .map_err(|e| NotifyError::Email(format!("SMTP relay error: {e}")))?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build();

        mailer
            .send(&email)
            .map_err(|e| NotifyError::Email(format!("failed to send email: {e}")))?;
        Ok(())
    }
}

/// Sends a single push notification to one device token.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync {
    /// Sends `entry` to `device_token`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Push`] if the send fails.
    async fn send(&self, device_token: &str, entry: &DigestEntry) -> Result<(), NotifyError>;
}

/// Provides a freshly signed APNs provider authentication token on demand.
/// ES256 JWT signing is deployment-specific key material, so this crate
/// takes the signed token as an injected dependency rather than performing
/// the signing itself.
pub trait ApnsAuthTokenProvider: Send + Sync {
    /// Returns the current bearer token for APNs HTTP/2 requests.
    fn current_token(&self) -> String;
}

/// APNs HTTP/2 push transport, grounded on the HTTP-client usage already in
/// the provider adapters (`reqwest` with a finite timeout).
pub struct ApnsPushTransport {
    client: reqwest::Client,
    team_id: String,
    bundle_id: String,
    endpoint: String,
    auth: std::sync::Arc<dyn ApnsAuthTokenProvider>,
}

impl ApnsPushTransport {
    /// Builds a transport targeting `endpoint` (production or sandbox APNs
    /// host), signing every request with tokens from `auth`.
    #[must_use]
    pub fn new(
        endpoint: String,
        team_id: String,
        bundle_id: String,
        auth: std::sync::Arc<dyn ApnsAuthTokenProvider>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(35))
                .build()
                .unwrap_or_default(),
            team_id,
            bundle_id,
            endpoint,
            auth,
        }
    }
}

#[async_trait::async_trait]
impl PushTransport for ApnsPushTransport {
    async fn send(&self, device_token: &str, entry: &DigestEntry) -> Result<(), NotifyError> {
        let url = format!("{}/3/device/{device_token}", self.endpoint);
        let body = serde_json::json!({
            "aps": { "alert": { "title": "New opening", "body": entry.venue_name } },
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.auth.current_token())
            .header("apns-topic", &self.bundle_id)
            .header("apns-push-type", "alert")
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Push(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(NotifyError::Push(format!(
                "apns rejected push for team {}: status {}",
                self.team_id,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedToken;
    impl ApnsAuthTokenProvider for FixedToken {
        fn current_token(&self) -> String {
            "fixed".to_string()
        }
    }

    #[test]
    fn apns_transport_builds_with_timeout_client() {
        let transport = ApnsPushTransport::new(
            "https://api.push.apple.com".to_string(),
            "TEAM123".to_string(),
            "com.example.app".to_string(),
            std::sync::Arc::new(FixedToken),
        );
        assert_eq!(transport.team_id, "TEAM123");
    }

    #[test]
    fn smtp_transport_renders_entries_into_html() {
        let entries = vec![DigestEntry {
            venue_name: "Carbone".to_string(),
            venue_id: "v1".to_string(),
            payload: serde_json::json!({}),
        }];
        let html = SmtpEmailTransport::render_html(&entries);
        assert!(html.contains("Carbone"));
    }
}
