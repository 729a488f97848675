//! Webhook registry and fire-and-forget delivery (§6 "Webhook format").
//! Grounded on
//! `examples/compusophy-bot-tempo-x402/crates/tempo-x402-facilitator/src/webhook.rs`
//! (`validate_webhook_urls` SSRF guards, `fire_webhooks` dispatch shape, HMAC
//! header convention); timeout widened from that file's 5s to this spec's 10s.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook url must use https")]
    NotHttps,
    #[error("webhook url resolves to a private or loopback host")]
    PrivateHost,
    #[error("webhook url host is empty")]
    NoHost,
}

/// Rejects obviously-unsafe webhook targets before registration (SSRF
/// hardening), matching the teacher's `validate_webhook_urls`.
pub fn validate_webhook_url(url: &Url) -> Result<(), WebhookError> {
    if url.scheme() != "https" {
        return Err(WebhookError::NotHttps);
    }
    let host = url.host_str().ok_or(WebhookError::NoHost)?;
    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal") {
        return Err(WebhookError::PrivateHost);
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if is_private_or_loopback(ip) {
            return Err(WebhookError::PrivateHost);
        }
    }
    Ok(())
}

fn is_private_or_loopback(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        std::net::IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[derive(Debug, Clone)]
pub struct WebhookRegistration {
    pub id: String,
    pub url: Url,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventData {
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    #[serde(rename = "txHash", skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub payer: String,
    pub receiver: String,
    pub token: String,
    pub amount: String,
    pub fee: String,
    pub network: String,
    pub status: String,
    #[serde(rename = "errorReason", skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event: String,
    pub timestamp: String,
    pub data: WebhookEventData,
}

/// Concurrency-safe registry: registrations are rare writes against a
/// read-mostly list, matching §5's general resource policy.
#[derive(Default)]
pub struct WebhookRegistry {
    inner: dashmap::DashMap<String, WebhookRegistration>,
    http: reqwest::Client,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        WebhookRegistry {
            inner: dashmap::DashMap::new(),
            http: reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build().unwrap_or_default(),
        }
    }

    pub fn register(&self, url: Url, secret: Option<String>, events: Vec<String>) -> Result<String, WebhookError> {
        validate_webhook_url(&url)?;
        let id = Uuid::new_v4().to_string();
        self.inner.insert(
            id.clone(),
            WebhookRegistration {
                id: id.clone(),
                url,
                secret,
                events,
                active: true,
                created_at: now_unix(),
            },
        );
        Ok(id)
    }

    pub fn list(&self) -> Vec<WebhookRegistration> {
        self.inner.iter().map(|e| e.clone()).collect()
    }

    pub fn deactivate(&self, id: &str) -> bool {
        if let Some(mut entry) = self.inner.get_mut(id) {
            entry.active = false;
            true
        } else {
            false
        }
    }

    /// Fire-and-forget dispatch to every active, subscribed registration.
    /// Delivery failures are logged but never propagate back to the
    /// settlement path (§6 "delivery failures are logged but do not affect
    /// settlement outcomes").
    pub fn fire(self: &Arc<Self>, event: WebhookEvent) {
        let targets: Vec<WebhookRegistration> = self
            .inner
            .iter()
            .filter(|e| e.active && (e.events.is_empty() || e.events.contains(&event.event)))
            .map(|e| e.clone())
            .collect();
        for target in targets {
            let http = self.http.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = deliver(&http, &target, &event).await {
                    tracing::warn!(webhook_id = %target.id, error = %err, "webhook delivery failed");
                }
            });
        }
    }
}

async fn deliver(http: &reqwest::Client, target: &WebhookRegistration, event: &WebhookEvent) -> Result<(), reqwest::Error> {
    let body = serde_json::to_vec(event).unwrap_or_default();
    let mut request = http
        .post(target.url.clone())
        .header("X-Webhook-Event", event.event.clone())
        .header("X-Webhook-Timestamp", event.timestamp.clone())
        .header("Content-Type", "application/json");
    if let Some(secret) = &target.secret {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(&body);
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Webhook-Signature", format!("sha256={signature}"));
    }
    request.body(body).send().await?;
    Ok(())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_http_and_private_hosts() {
        assert!(matches!(validate_webhook_url(&Url::parse("http://example.com").unwrap()), Err(WebhookError::NotHttps)));
        assert!(matches!(
            validate_webhook_url(&Url::parse("https://localhost/hook").unwrap()),
            Err(WebhookError::PrivateHost)
        ));
        assert!(matches!(
            validate_webhook_url(&Url::parse("https://127.0.0.1/hook").unwrap()),
            Err(WebhookError::PrivateHost)
        ));
        assert!(validate_webhook_url(&Url::parse("https://example.com/hook").unwrap()).is_ok());
    }

    #[test]
    fn registry_register_list_deactivate() {
        let registry = WebhookRegistry::new();
        let id = registry
            .register(Url::parse("https://example.com/hook").unwrap(), Some("secret".into()), vec!["settlement.success".into()])
            .unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.deactivate(&id));
        assert!(!registry.list()[0].active);
    }
}
