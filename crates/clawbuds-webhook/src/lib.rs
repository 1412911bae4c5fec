//! Webhook notifier.
//!
//! POSTs agent triggers to a configured URL with an HMAC-SHA256 signature
//! over the JSON body in `X-ClawBuds-Signature`. Delivery is bounded by a
//! request timeout and treated as fire-and-forget by callers; failures are
//! logged, never propagated into domain flows.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use clawbuds::error::{CoreError, Result};
use clawbuds::notifier::{AgentNotifier, AgentTrigger};

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried on every delivery.
pub const SIGNATURE_HEADER: &str = "X-ClawBuds-Signature";

/// Default delivery timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Webhook-backed implementation of the notifier interface.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("http client: {e}")))?;
        Ok(Self { client, url: url.into(), secret: secret.into() })
    }

    /// Build from `OPENCLAW_WEBHOOK_URL`, `OPENCLAW_WEBHOOK_SECRET` and
    /// `OPENCLAW_WEBHOOK_TIMEOUT_MS`. Returns `None` when no URL is set.
    pub fn from_env() -> Option<Result<Self>> {
        let url = std::env::var("OPENCLAW_WEBHOOK_URL").ok()?;
        let secret = std::env::var("OPENCLAW_WEBHOOK_SECRET").unwrap_or_default();
        let timeout = std::env::var("OPENCLAW_WEBHOOK_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        Some(Self::new(url, secret, timeout))
    }

    /// Hex HMAC-SHA256 of the body under the shared secret.
    fn sign(&self, body: &[u8]) -> String {
        #[allow(clippy::expect_used)]
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take a key of any size");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let signature = self.sign(&body);
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::Internal(format!("webhook delivery: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::Internal(format!(
                "webhook responded {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentNotifier for WebhookNotifier {
    async fn trigger_agent(&self, trigger: AgentTrigger) -> Result<()> {
        let body = serde_json::to_vec(&trigger)
            .map_err(|e| CoreError::Internal(format!("trigger encoding: {e}")))?;
        debug!(batch = %trigger.batch_id, url = %self.url, "delivering agent trigger");
        if let Err(err) = self.post(body).await {
            warn!(batch = %trigger.batch_id, error = %err, "webhook trigger failed");
            return Err(err);
        }
        Ok(())
    }

    async fn notify(&self, message: &str) -> Result<()> {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "WAKE",
            "message": message,
        }))
        .map_err(|e| CoreError::Internal(format!("notify encoding: {e}")))?;
        self.post(body).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let notifier =
            WebhookNotifier::new("http://localhost:9", "secret", DEFAULT_TIMEOUT).unwrap();
        let first = notifier.sign(b"{\"a\":1}");
        let second = notifier.sign(b"{\"a\":1}");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, notifier.sign(b"{\"a\":2}"));
    }

    #[test]
    fn from_env_without_url_is_none() {
        std::env::remove_var("OPENCLAW_WEBHOOK_URL");
        assert!(WebhookNotifier::from_env().is_none());
    }
}
