//! Webhook-based notification sink.

use async_trait::async_trait;
use serde_json::json;

use super::{DeliveryError, NotificationSink, RequestNotice};

/// Production sink that POSTs each notice to a configured webhook URL.
///
/// The receiving application owns the actual channel fan-out (push tokens,
/// email, whatever); this sink only crosses the process boundary.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[tracing::instrument(skip(self, notice), fields(request_id = %notice.request_id))]
    async fn deliver(&self, notice: &RequestNotice) -> Result<(), DeliveryError> {
        // A notice without a destination token can never be delivered.
        let Some(token) = &notice.contact_token else {
            return Err(DeliveryError::Rejected(
                "seller has no contact token".to_string(),
            ));
        };

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "request_id": notice.request_id,
                "seller_id": notice.seller_id,
                "contact_token": token,
            }))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Webhook accepted notice");
            return Ok(());
        }

        // 429 and server errors may clear up; other client errors will not.
        if status.as_u16() == 429 || status.is_server_error() {
            Err(DeliveryError::Transient(format!(
                "webhook returned status {}",
                status.as_u16()
            )))
        } else {
            Err(DeliveryError::Rejected(format!(
                "webhook returned status {}",
                status.as_u16()
            )))
        }
    }
}
