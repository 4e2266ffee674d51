//! The payment gateway: initiation, webhook handling and status reads.

use std::sync::Arc;

use common::{AggregateId, Clock, RetryPolicy, SystemClock, retry_with_backoff};
use domain::{CommandHandler, DomainError, Money, Payment, PaymentStatus, payment_id_for};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::provider::{PaymentProvider, ProviderRequest};
use crate::signature::WebhookSigner;
use crate::webhook::{
    PaymentOutcome, WebhookEvent, WebhookOutcome, WebhookRecord, WebhookRecordedData,
};

/// Reference to an initiated payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub external_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: Money,
    pub currency: String,
}

/// Read-only payment status for client polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
    pub status: PaymentStatus,
    pub amount: Money,
    pub currency: String,
    pub external_id: Option<String>,
}

fn handle_of(payment: &Payment, payment_id: AggregateId, order_id: AggregateId) -> PaymentHandle {
    PaymentHandle {
        payment_id,
        order_id,
        external_id: payment.external_id().map(str::to_string),
        status: payment.status(),
        amount: payment.amount(),
        currency: payment.currency().to_string(),
    }
}

/// Concurrent webhooks for one payment race on its version; the loser
/// reloads and re-decides a few times before giving up.
fn conflict_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(std::time::Duration::from_millis(5))
        .max_delay(std::time::Duration::from_millis(50))
        .build()
}

pub struct PaymentGateway<S: EventStore> {
    payments: CommandHandler<S, Payment>,
    webhooks: CommandHandler<S, WebhookRecord>,
    provider: Arc<dyn PaymentProvider>,
    signer: WebhookSigner,
    callback_url: String,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore + Clone> PaymentGateway<S> {
    pub fn new(
        store: S,
        provider: Arc<dyn PaymentProvider>,
        signer: WebhookSigner,
        callback_url: impl Into<String>,
    ) -> Self {
        Self::with_clock(store, provider, signer, callback_url, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: S,
        provider: Arc<dyn PaymentProvider>,
        signer: WebhookSigner,
        callback_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments: CommandHandler::new(store.clone()),
            webhooks: CommandHandler::new(store),
            provider,
            signer,
            callback_url: callback_url.into(),
            clock,
        }
    }
}

impl<S: EventStore> PaymentGateway<S> {
    /// Creates the order's payment and forwards it to the provider.
    ///
    /// Idempotent per order: the payment id is derived from the order id,
    /// so a retry finds the existing payment and returns its handle. A
    /// payment the provider never acknowledged is forwarded again under
    /// the same idempotency key.
    #[tracing::instrument(skip_all, fields(%order_id, %amount, currency))]
    pub async fn initiate(
        &self,
        order_id: AggregateId,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentHandle> {
        let payment_id = payment_id_for(order_id);
        let now = self.clock.now();

        let payment = match self.payments.load_existing(payment_id).await? {
            Some(existing) => existing,
            None => match self
                .payments
                .execute(payment_id, |p| {
                    p.initiate(payment_id, order_id, amount, currency, now)
                })
                .await
            {
                Ok(created) => {
                    metrics::counter!("payments_initiated_total").increment(1);
                    created.aggregate
                }
                // Someone else created it between our load and append.
                Err(err) if err.is_conflict() => self.payments.get(payment_id).await?,
                Err(err) => return Err(err.into()),
            },
        };

        if payment.external_id().is_some() {
            return Ok(handle_of(&payment, payment_id, order_id));
        }

        let request = ProviderRequest {
            amount: payment.amount().minor(),
            currency: payment.currency().to_string(),
            order_id: order_id.to_string(),
            callback_url: self.callback_url.clone(),
            description: format!("Order {order_id}"),
            idempotency_key: payment.idempotency_key().to_string(),
        };
        let receipt = self.provider.initiate(&request).await?;

        let acknowledged = retry_with_backoff(&conflict_policy(), PaymentError::is_conflict, || {
            let external_id = receipt.payment_id.clone();
            async move {
                self.payments
                    .execute(payment_id, |p| p.acknowledge(&external_id, now))
                    .await
                    .map_err(PaymentError::from)
            }
        })
        .await?;

        tracing::info!(external_id = %receipt.payment_id, "payment forwarded to provider");
        Ok(handle_of(&acknowledged.aggregate, payment_id, order_id))
    }

    /// Verifies, deduplicates and applies one provider callback.
    ///
    /// A bad signature is rejected before anything is read or written. A
    /// repeated `event_id` returns the outcome stored the first time with
    /// `duplicate` set.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, status = %event.status)
    )]
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        if !self.signer.verify(event) {
            tracing::warn!(
                security_event = true,
                payment_id = %event.payment_id,
                order_id = %event.order_id,
                "webhook signature verification failed"
            );
            metrics::counter!("webhooks_received_total", "outcome" => "invalid_signature")
                .increment(1);
            return Err(PaymentError::InvalidSignature {
                event_id: event.event_id.clone(),
            });
        }

        if event.event_id.trim().is_empty() {
            return Err(PaymentError::Validation("webhook event_id is empty".into()));
        }
        let reported = PaymentStatus::parse(&event.status).ok_or_else(|| {
            PaymentError::Validation(format!("unknown payment status {:?}", event.status))
        })?;

        let record_id = event.record_id();
        if let Some(stored) = self.stored_outcome(record_id).await? {
            metrics::counter!("webhooks_received_total", "outcome" => "duplicate").increment(1);
            tracing::info!("duplicate webhook delivery");
            return Ok(stored);
        }

        let (payment_id, order_id) = match self.resolve(event).await? {
            Some(ids) => ids,
            None => {
                metrics::counter!("webhooks_received_total", "outcome" => "unknown_payment")
                    .increment(1);
                return Err(PaymentError::UnknownPayment {
                    reference: event.payment_id.clone(),
                });
            }
        };

        let now = self.clock.now();
        let applied = retry_with_backoff(
            &conflict_policy(),
            PaymentError::is_conflict,
            || async move {
                let payment = self.payments.get(payment_id).await?;
                let (target, reason) = Self::judge(&payment, event, reported);
                self.payments
                    .execute(payment_id, |p| p.record_status(target, &reason, now))
                    .await
                    .map_err(PaymentError::from)
            },
        )
        .await?;

        let payment = applied.aggregate;
        let outcome = PaymentOutcome::from_status(payment.status(), payment.failure_reason());
        let label = if applied.events.is_empty() {
            "ignored"
        } else {
            "applied"
        };

        let recorded = self
            .webhooks
            .execute(record_id, |record| {
                record.record(WebhookRecordedData {
                    event_id: event.event_id.clone(),
                    order_id,
                    payment_id,
                    reported_status: event.status.clone(),
                    signature: event.signature.clone(),
                    status: payment.status(),
                    outcome: outcome.clone(),
                    received_at: now,
                })
            })
            .await;

        match recorded {
            Ok(_) => {}
            // A concurrent delivery of the same event recorded first.
            Err(err) if err.is_conflict() || err.is_already_exists() => {
                if let Some(stored) = self.stored_outcome(record_id).await? {
                    metrics::counter!("webhooks_received_total", "outcome" => "duplicate")
                        .increment(1);
                    return Ok(stored);
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }

        metrics::counter!("webhooks_received_total", "outcome" => label).increment(1);
        tracing::info!(
            %order_id,
            status = %payment.status(),
            outcome = outcome.as_str(),
            label,
            "webhook processed"
        );

        Ok(WebhookOutcome {
            event_id: event.event_id.clone(),
            order_id,
            payment_id,
            status: payment.status(),
            outcome,
            duplicate: false,
        })
    }

    /// Target status for a reported one. Amount or currency that disagree
    /// with the stored payment are treated as a failed payment.
    fn judge(
        payment: &Payment,
        event: &WebhookEvent,
        reported: PaymentStatus,
    ) -> (PaymentStatus, String) {
        let amount_matches = payment.amount().minor() == event.amount;
        let currency_matches = payment.currency().eq_ignore_ascii_case(event.currency.trim());
        if amount_matches && currency_matches {
            return (reported, format!("provider reported {reported}"));
        }

        tracing::warn!(
            expected_amount = payment.amount().minor(),
            reported_amount = event.amount,
            expected_currency = payment.currency(),
            reported_currency = %event.currency,
            "webhook amount does not match the payment"
        );
        (
            PaymentStatus::Failed,
            format!(
                "amount mismatch: expected {} {}, reported {} {}",
                payment.amount().minor(),
                payment.currency(),
                event.amount,
                event.currency
            ),
        )
    }

    async fn stored_outcome(&self, record_id: AggregateId) -> Result<Option<WebhookOutcome>> {
        Ok(self
            .webhooks
            .load_existing(record_id)
            .await?
            .and_then(|record| record.outcome()))
    }

    /// Finds the payment a webhook refers to. `payment_id` may be our id or
    /// the provider's reference; either way it must belong to `order_id`.
    async fn resolve(&self, event: &WebhookEvent) -> Result<Option<(AggregateId, AggregateId)>> {
        let Ok(order_id) = event.order_id.trim().parse::<AggregateId>() else {
            return Ok(None);
        };
        let payment_id = payment_id_for(order_id);
        let Some(payment) = self.payments.load_existing(payment_id).await? else {
            return Ok(None);
        };

        let reference = event.payment_id.trim();
        let matches = reference == payment_id.to_string()
            || payment.external_id().is_some_and(|ext| ext == reference);
        Ok(matches.then_some((payment_id, order_id)))
    }

    pub async fn find(&self, order_id: AggregateId) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .load_existing(payment_id_for(order_id))
            .await?)
    }

    pub async fn get_status(&self, order_id: AggregateId) -> Result<PaymentStatusView> {
        let payment_id = payment_id_for(order_id);
        let payment = self
            .payments
            .load_existing(payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                order_id: order_id.to_string(),
            })?;

        Ok(PaymentStatusView {
            order_id,
            payment_id,
            status: payment.status(),
            amount: payment.amount(),
            currency: payment.currency().to_string(),
            external_id: payment.external_id().map(str::to_string),
        })
    }

    /// Cancels a payment that has not reached a terminal status. Returns
    /// `None` when the order never had a payment.
    #[tracing::instrument(skip_all, fields(%order_id, reason))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<Option<PaymentStatus>> {
        let payment_id = payment_id_for(order_id);
        if self.payments.load_existing(payment_id).await?.is_none() {
            return Ok(None);
        }

        let now = self.clock.now();
        let result = retry_with_backoff(
            &conflict_policy(),
            PaymentError::is_conflict,
            || async move {
                self.payments
                    .execute(payment_id, |p| p.cancel(reason, now))
                    .await
                    .map_err(PaymentError::from)
            },
        )
        .await?;
        Ok(Some(result.aggregate.status()))
    }
}

impl<S: EventStore + Clone> Clone for PaymentGateway<S> {
    fn clone(&self) -> Self {
        Self {
            payments: self.payments.clone(),
            webhooks: self.webhooks.clone(),
            provider: self.provider.clone(),
            signer: self.signer.clone(),
            callback_url: self.callback_url.clone(),
            clock: self.clock.clone(),
        }
    }
}
