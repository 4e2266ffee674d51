//! Subscribers that hand messages to a downstream service over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::message::{IntegrationEvent, ORDER_CANCELED, ORDER_PAID};
use crate::subscriber::Subscriber;
use crate::{OutboxError, Result};

/// Body of every delivery. The downstream deduplicates on `event_id`,
/// which is also sent as the `Idempotency-Key` header.
#[derive(Debug, Serialize)]
struct Delivery<'a> {
    event_id: String,
    event_type: &'a str,
    order_id: String,
    user_id: String,
    payload: &'a serde_json::Value,
    occurred_at: chrono::DateTime<chrono::Utc>,
}

/// POSTs each wanted message as JSON to a fixed URL.
///
/// Any non-2xx answer or transport error fails the delivery; the relay
/// retries it and then parks the subscriber at that message.
#[derive(Clone, Debug)]
pub struct HttpSubscriber {
    name: &'static str,
    url: String,
    event_types: &'static [&'static str],
    http_client: Client,
}

impl HttpSubscriber {
    /// Shipping intake: paid orders only.
    pub fn shipping(url: impl Into<String>) -> Result<Self> {
        Self::new("shipping", url, &[ORDER_PAID])
    }

    /// Customer notifications: paid and canceled orders.
    pub fn notifications(url: impl Into<String>) -> Result<Self> {
        Self::new("notifications", url, &[ORDER_PAID, ORDER_CANCELED])
    }

    pub fn new(
        name: &'static str,
        url: impl Into<String>,
        event_types: &'static [&'static str],
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            name,
            url: url.into(),
            event_types,
            http_client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    fn name(&self) -> &'static str {
        self.name
    }

    fn wants(&self, event_type: &str) -> bool {
        self.event_types.contains(&event_type)
    }

    #[tracing::instrument(skip_all, fields(subscriber = self.name, order_id = %event.order_id))]
    async fn deliver(&self, event: &IntegrationEvent) -> Result<()> {
        let body = Delivery {
            event_id: event.event_id.to_string(),
            event_type: event.event_type,
            order_id: event.order_id.to_string(),
            user_id: event.user_id.to_string(),
            payload: &event.payload,
            occurred_at: event.occurred_at,
        };
        let response = self
            .http_client
            .post(&self.url)
            .header("Idempotency-Key", &body.event_id)
            .json(&body)
            .send()
            .await
            .map_err(|err| OutboxError::delivery(self.name, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OutboxError::delivery(
                self.name,
                format!("{} answered {status}: {text}", self.url),
            ));
        }
        tracing::debug!(%status, "message delivered");
        Ok(())
    }
}
