//! Webhook payloads and the append-only record of processed deliveries.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, DomainError, DomainEvent, PaymentStatus};
use event_store::Version;
use serde::{Deserialize, Serialize};

/// A provider callback as it arrives on the wire.
///
/// `payment_id` may carry either our payment id or the provider's own
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub payment_id: String,
    pub order_id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Joins the signed fields; none of them may contain it.
pub(crate) const SIGNING_SEPARATOR: char = '|';

impl WebhookEvent {
    /// Whether a signed text field contains the separator. Such an event
    /// has the same signing payload as some other field split, so it never
    /// verifies.
    pub(crate) fn has_separator_in_fields(&self) -> bool {
        [
            &self.event_id,
            &self.payment_id,
            &self.order_id,
            &self.status,
            &self.currency,
        ]
        .iter()
        .any(|field| field.contains(SIGNING_SEPARATOR))
    }

    pub(crate) fn signing_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.event_id, self.payment_id, self.order_id, self.status, self.amount, self.currency
        )
    }

    /// Derived id of the dedup record for this delivery.
    pub fn record_id(&self) -> AggregateId {
        AggregateId::derived("webhook", &self.event_id)
    }
}

/// What a payment's current status means for its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
    Pending,
}

impl PaymentOutcome {
    pub fn from_status(status: PaymentStatus, reason: Option<&str>) -> Self {
        if status.is_success() {
            PaymentOutcome::Succeeded
        } else if status.is_failure() {
            PaymentOutcome::Failed {
                reason: reason.unwrap_or(status.as_str()).to_string(),
            }
        } else {
            PaymentOutcome::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Failed { .. } => "failed",
            PaymentOutcome::Pending => "pending",
        }
    }
}

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub event_id: String,
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
    /// Payment status after the delivery was applied.
    pub status: PaymentStatus,
    pub outcome: PaymentOutcome,
    /// True when this `event_id` was processed before; the stored outcome
    /// is returned and nothing is re-applied.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRecordedData {
    pub event_id: String,
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
    pub reported_status: String,
    pub signature: String,
    pub status: PaymentStatus,
    pub outcome: PaymentOutcome,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WebhookRecordEvent {
    WebhookRecorded(WebhookRecordedData),
}

impl DomainEvent for WebhookRecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WebhookRecordEvent::WebhookRecorded(_) => "WebhookRecorded",
        }
    }
}

/// Dedup record keyed by the provider's `event_id`.
#[derive(Debug, Clone, Default)]
pub struct WebhookRecord {
    id: Option<AggregateId>,
    version: Version,
    recorded: Option<WebhookRecordedData>,
}

impl Aggregate for WebhookRecord {
    type Event = WebhookRecordEvent;
    type Error = DomainError;

    fn aggregate_type() -> &'static str {
        "WebhookRecord"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            WebhookRecordEvent::WebhookRecorded(data) => {
                self.id = Some(AggregateId::derived("webhook", &data.event_id));
                self.recorded = Some(data);
            }
        }
    }
}

impl WebhookRecord {
    pub fn record(
        &self,
        data: WebhookRecordedData,
    ) -> Result<Vec<WebhookRecordEvent>, DomainError> {
        if let Some(id) = self.id {
            return Err(DomainError::AlreadyExists {
                aggregate_type: Self::aggregate_type(),
                aggregate_id: id,
            });
        }
        Ok(vec![WebhookRecordEvent::WebhookRecorded(data)])
    }

    /// The outcome stored when the delivery was first processed.
    pub fn outcome(&self) -> Option<WebhookOutcome> {
        self.recorded.as_ref().map(|data| WebhookOutcome {
            event_id: data.event_id.clone(),
            order_id: data.order_id,
            payment_id: data.payment_id,
            status: data.status,
            outcome: data.outcome.clone(),
            duplicate: true,
        })
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.recorded.as_ref().map(|data| data.received_at)
    }
}
