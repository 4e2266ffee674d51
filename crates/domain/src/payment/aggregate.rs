use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::money::Money;

use super::events::*;
use super::{PaymentStateError, PaymentStatus};

#[derive(Debug, Clone, Default)]
pub struct Payment {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<AggregateId>,
    amount: Money,
    currency: String,
    status: PaymentStatus,
    external_id: Option<String>,
    idempotency_key: String,
    failure_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentStateError;

    fn aggregate_type() -> &'static str {
        "Payment"
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
            PaymentEvent::PaymentInitiated(data) => {
                self.id = Some(data.payment_id);
                self.order_id = Some(data.order_id);
                self.amount = data.amount;
                self.currency = data.currency;
                self.idempotency_key = data.idempotency_key;
                self.status = PaymentStatus::Pending;
                self.created_at = Some(data.initiated_at);
                self.updated_at = Some(data.initiated_at);
            }
            PaymentEvent::ProviderAcknowledged(data) => {
                self.external_id = Some(data.external_id);
                self.updated_at = Some(data.acknowledged_at);
            }
            PaymentEvent::PaymentAuthorized(data) => {
                self.status = PaymentStatus::Authorized;
                self.updated_at = Some(data.authorized_at);
            }
            PaymentEvent::PaymentCaptured(data) => {
                self.status = PaymentStatus::Captured;
                self.updated_at = Some(data.captured_at);
            }
            PaymentEvent::PaymentRejected(data) => {
                self.status = PaymentStatus::Rejected;
                self.failure_reason = Some(data.reason);
                self.updated_at = Some(data.rejected_at);
            }
            PaymentEvent::PaymentFailed(data) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(data.reason);
                self.updated_at = Some(data.failed_at);
            }
            PaymentEvent::PaymentCanceled(data) => {
                self.status = PaymentStatus::Canceled;
                self.failure_reason = Some(data.reason);
                self.updated_at = Some(data.canceled_at);
            }
        }
    }
}

impl Payment {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn require_initiated(&self) -> Result<(), PaymentStateError> {
        if self.id.is_none() {
            return Err(PaymentStateError::NotInitiated);
        }
        Ok(())
    }
}

impl Payment {
    pub fn initiate(
        &self,
        payment_id: AggregateId,
        order_id: AggregateId,
        amount: Money,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentStateError> {
        if self.id.is_some() {
            return Err(PaymentStateError::AlreadyInitiated);
        }
        if !amount.is_positive() {
            return Err(PaymentStateError::InvalidAmount {
                amount: amount.minor(),
            });
        }
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentStateError::InvalidCurrency { currency });
        }

        Ok(vec![PaymentEvent::PaymentInitiated(PaymentInitiatedData {
            payment_id,
            order_id,
            amount,
            currency,
            idempotency_key: order_id.to_string(),
            initiated_at: now,
        })])
    }

    /// Records the provider's reference. Re-acknowledging with the same
    /// reference is a no-op.
    pub fn acknowledge(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentStateError> {
        self.require_initiated()?;
        match self.external_id.as_deref() {
            Some(current) if current == external_id => Ok(vec![]),
            Some(current) => Err(PaymentStateError::ExternalIdMismatch {
                current: current.to_string(),
                received: external_id.to_string(),
            }),
            None => Ok(vec![PaymentEvent::ProviderAcknowledged(
                ProviderAcknowledgedData {
                    external_id: external_id.to_string(),
                    acknowledged_at: now,
                },
            )]),
        }
    }

    /// Moves the payment to a provider-reported status.
    ///
    /// Transitions the state machine does not allow (anything out of a
    /// terminal status, or a failure after authorization) produce no events.
    pub fn record_status(
        &self,
        target: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentStateError> {
        self.require_initiated()?;

        let allowed = match (self.status, target) {
            (current, _) if current.is_terminal() => false,
            (current, target) if current == target => false,
            (PaymentStatus::Pending, _) => true,
            (PaymentStatus::Authorized, PaymentStatus::Captured | PaymentStatus::Canceled) => true,
            _ => false,
        };
        if !allowed {
            return Ok(vec![]);
        }

        let reason = reason.to_string();
        let event = match target {
            PaymentStatus::Pending => return Ok(vec![]),
            PaymentStatus::Authorized => {
                PaymentEvent::PaymentAuthorized(PaymentAuthorizedData { authorized_at: now })
            }
            PaymentStatus::Captured => {
                PaymentEvent::PaymentCaptured(PaymentCapturedData { captured_at: now })
            }
            PaymentStatus::Rejected => PaymentEvent::PaymentRejected(PaymentRejectedData {
                reason,
                rejected_at: now,
            }),
            PaymentStatus::Failed => PaymentEvent::PaymentFailed(PaymentFailedData {
                reason,
                failed_at: now,
            }),
            PaymentStatus::Canceled => PaymentEvent::PaymentCanceled(PaymentCanceledData {
                reason,
                canceled_at: now,
            }),
        };
        Ok(vec![event])
    }

    pub fn cancel(
        &self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentStateError> {
        self.record_status(PaymentStatus::Canceled, reason, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initiated() -> Payment {
        let mut payment = Payment::default();
        let order_id = AggregateId::new();
        let events = payment
            .initiate(
                super::super::payment_id_for(order_id),
                order_id,
                Money::from_minor(5_000),
                "rub",
                Utc::now(),
            )
            .unwrap();
        payment.apply_events(events);
        payment
    }

    fn with_status(status: PaymentStatus) -> Payment {
        let mut payment = initiated();
        let events = payment.record_status(status, "test", Utc::now()).unwrap();
        payment.apply_events(events);
        payment
    }

    #[test]
    fn initiate_uses_order_id_as_idempotency_key() {
        let payment = initiated();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.currency(), "RUB");
        assert_eq!(
            payment.idempotency_key(),
            payment.order_id().unwrap().to_string()
        );
    }

    #[test]
    fn initiate_rejects_non_positive_amount_and_bad_currency() {
        let order_id = AggregateId::new();
        let p = Payment::default();
        assert!(matches!(
            p.initiate(order_id, order_id, Money::zero(), "RUB", Utc::now()),
            Err(PaymentStateError::InvalidAmount { .. })
        ));
        assert!(matches!(
            p.initiate(order_id, order_id, Money::from_minor(1), "RUBLE", Utc::now()),
            Err(PaymentStateError::InvalidCurrency { .. })
        ));
    }

    #[test]
    fn acknowledge_is_idempotent_for_same_reference() {
        let mut payment = initiated();
        payment.apply_events(payment.acknowledge("psp-1", Utc::now()).unwrap());

        assert!(payment.acknowledge("psp-1", Utc::now()).unwrap().is_empty());
        assert!(matches!(
            payment.acknowledge("psp-2", Utc::now()),
            Err(PaymentStateError::ExternalIdMismatch { .. })
        ));
        assert_eq!(payment.external_id(), Some("psp-1"));
    }

    #[test]
    fn authorized_then_captured() {
        let mut payment = with_status(PaymentStatus::Authorized);
        payment.apply_events(
            payment
                .record_status(PaymentStatus::Captured, "", Utc::now())
                .unwrap(),
        );
        assert_eq!(payment.status(), PaymentStatus::Captured);
    }

    #[test]
    fn terminal_payment_ignores_later_statuses() {
        for terminal in [
            PaymentStatus::Captured,
            PaymentStatus::Rejected,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
        ] {
            let payment = with_status(terminal);
            for next in [
                PaymentStatus::Authorized,
                PaymentStatus::Captured,
                PaymentStatus::Failed,
                PaymentStatus::Canceled,
            ] {
                assert!(
                    payment
                        .record_status(next, "late", Utc::now())
                        .unwrap()
                        .is_empty(),
                    "{terminal} -> {next} should be ignored"
                );
            }
        }
    }

    #[test]
    fn failure_after_authorization_is_ignored() {
        let payment = with_status(PaymentStatus::Authorized);
        assert!(
            payment
                .record_status(PaymentStatus::Rejected, "late", Utc::now())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn rejection_keeps_reason() {
        let payment = with_status(PaymentStatus::Rejected);
        assert_eq!(payment.failure_reason(), Some("test"));
        assert!(payment.status().is_failure());
    }

    #[test]
    fn status_changes_require_initiation() {
        assert!(matches!(
            Payment::default().record_status(PaymentStatus::Captured, "", Utc::now()),
            Err(PaymentStateError::NotInitiated)
        ));
    }
}
