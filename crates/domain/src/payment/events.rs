use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentInitiated(PaymentInitiatedData),
    /// The provider accepted the request and assigned its own reference.
    ProviderAcknowledged(ProviderAcknowledgedData),
    PaymentAuthorized(PaymentAuthorizedData),
    PaymentCaptured(PaymentCapturedData),
    PaymentRejected(PaymentRejectedData),
    PaymentFailed(PaymentFailedData),
    PaymentCanceled(PaymentCanceledData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentInitiated(_) => "PaymentInitiated",
            PaymentEvent::ProviderAcknowledged(_) => "ProviderAcknowledged",
            PaymentEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            PaymentEvent::PaymentCaptured(_) => "PaymentCaptured",
            PaymentEvent::PaymentRejected(_) => "PaymentRejected",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::PaymentCanceled(_) => "PaymentCanceled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitiatedData {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub amount: Money,
    pub currency: String,
    pub idempotency_key: String,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAcknowledgedData {
    pub external_id: String,
    pub acknowledged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    pub authorized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRejectedData {
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCanceledData {
    pub reason: String,
    pub canceled_at: DateTime<Utc>,
}
