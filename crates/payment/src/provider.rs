//! Outbound calls to the payment service provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// Body of `POST {base}/initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub order_id: String,
    pub callback_url: String,
    pub description: String,
    /// Sent as the `Idempotency-Key` header, not in the body.
    #[serde(skip)]
    pub idempotency_key: String,
}

/// The provider's acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider-side reference; stored as the payment's external id.
    pub payment_id: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a payment intent. Repeating a request with the same
    /// idempotency key must return the same reference.
    async fn initiate(&self, request: &ProviderRequest) -> Result<ProviderReceipt>;
}

/// JSON-over-HTTP provider client.
#[derive(Clone, Debug)]
pub struct HttpPaymentProvider {
    base_url: String,
    http_client: Client,
}

impl HttpPaymentProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate(&self, request: &ProviderRequest) -> Result<ProviderReceipt> {
        let response = self
            .http_client
            .post(format!("{}/initiate", self.base_url))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::provider(
                format!("provider answered {status}: {body}"),
                status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            ));
        }

        let receipt: ProviderReceipt = response.json().await?;
        if receipt.payment_id.trim().is_empty() {
            return Err(PaymentError::provider(
                "provider returned an empty payment reference",
                false,
            ));
        }
        Ok(receipt)
    }
}
