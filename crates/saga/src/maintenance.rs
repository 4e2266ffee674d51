//! Background sweep: reservation expiry, payment timeouts and
//! reconciliation of orders left behind by a crash.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, CancelReason, DomainError, Order, OrderEvent};
use event_store::{EventEnvelope, EventStore};
use serde::Serialize;

use crate::coordinator::{SagaCoordinator, Verdict};
use crate::error::Result;

const CATCH_UP_BATCH: usize = 256;

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Held reservations released because they expired.
    pub reservations_released: usize,
    /// Orders canceled because their payment never completed in time.
    pub orders_timed_out: usize,
    /// Orders whose payment had settled but whose order had not.
    pub orders_reconciled: usize,
    /// Orders canceled because they never got past `New`.
    pub orders_abandoned: usize,
}

/// Orders the saga has not finished with, kept current by following the
/// event log from a checkpoint.
#[derive(Debug, Default)]
pub(crate) struct PendingPayments {
    checkpoint: i64,
    /// `New` orders by creation time.
    placed: HashMap<AggregateId, DateTime<Utc>>,
    /// Orders awaiting payment by payment deadline.
    deadlines: HashMap<AggregateId, DateTime<Utc>>,
}

impl PendingPayments {
    fn apply(&mut self, envelope: &EventEnvelope) -> Result<()> {
        self.checkpoint = self.checkpoint.max(envelope.sequence);
        if envelope.aggregate_type != Order::aggregate_type() {
            return Ok(());
        }

        let order_id = envelope.aggregate_id;
        match envelope.event_type.as_str() {
            OrderEvent::PLACED => {
                let event = envelope.decode::<OrderEvent>().map_err(DomainError::from)?;
                if let OrderEvent::OrderPlaced(data) = event {
                    self.placed.insert(order_id, data.created_at);
                }
            }
            OrderEvent::PAYMENT_REQUESTED => {
                let event = envelope.decode::<OrderEvent>().map_err(DomainError::from)?;
                if let OrderEvent::PaymentRequested(data) = event {
                    self.placed.remove(&order_id);
                    self.deadlines.insert(order_id, data.payment_deadline);
                }
            }
            OrderEvent::PAID | OrderEvent::PAYMENT_FAILED | OrderEvent::CANCELED => {
                self.placed.remove(&order_id);
                self.deadlines.remove(&order_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<(AggregateId, DateTime<Utc>)> {
        self.deadlines
            .iter()
            .map(|(order_id, deadline)| (*order_id, *deadline))
            .collect()
    }

    /// `New` orders placed at or before `cutoff`.
    fn placed_before(&self, cutoff: DateTime<Utc>) -> Vec<AggregateId> {
        self.placed
            .iter()
            .filter(|(_, created_at)| **created_at <= cutoff)
            .map(|(order_id, _)| *order_id)
            .collect()
    }
}

enum Swept {
    TimedOut,
    Reconciled,
}

impl<S: EventStore> SagaCoordinator<S> {
    /// One pass of the background sweep.
    ///
    /// Releases expired reservations, then looks at every order still
    /// awaiting payment: one whose payment already settled gets that outcome
    /// applied, one whose payment window or reservation ran out goes
    /// through the same compensation as a failed payment. Both paths share
    /// the ledger's idempotent release, so they never release twice.
    /// Orders stuck in `New` past the stale threshold are canceled.
    ///
    /// The pending set is locked only to read or update it, never while a
    /// collaborator is called.
    #[tracing::instrument(skip(self))]
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let expired = self.ledger.release_expired().await?;
        report.reservations_released = expired.len();

        self.catch_up().await?;
        let now = self.clock.now();
        let (awaiting_payment, stale) = {
            let pending = self.pending.lock().await;
            let cutoff = now - self.policy().stale_order_after;
            (pending.snapshot(), pending.placed_before(cutoff))
        };

        for (order_id, deadline) in awaiting_payment {
            match self.sweep_order(order_id, deadline, now).await {
                Ok(Some(Swept::TimedOut)) => report.orders_timed_out += 1,
                Ok(Some(Swept::Reconciled)) => report.orders_reconciled += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "sweep could not settle order");
                }
            }
        }

        for order_id in stale {
            match self.cancel_stale(order_id).await {
                Ok(Some(_)) => report.orders_abandoned += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "sweep could not cancel stale order");
                }
            }
        }

        if report != MaintenanceReport::default() {
            tracing::info!(?report, "maintenance pass finished");
        }
        Ok(report)
    }

    /// Applies the log past the checkpoint. Batches are read unlocked; a
    /// concurrent pass may have applied part of one already, so only events
    /// past the current checkpoint are applied.
    async fn catch_up(&self) -> Result<()> {
        let store = self.orders.handler().store();
        loop {
            let checkpoint = self.pending.lock().await.checkpoint;
            let batch = store
                .read_from(checkpoint, CATCH_UP_BATCH)
                .await
                .map_err(DomainError::from)?;
            if batch.is_empty() {
                return Ok(());
            }

            let mut pending = self.pending.lock().await;
            for envelope in &batch {
                if envelope.sequence > pending.checkpoint {
                    pending.apply(envelope)?;
                }
            }
        }
    }

    async fn sweep_order(
        &self,
        order_id: AggregateId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Swept>> {
        let Some(order) = self.orders.find(order_id).await? else {
            return Ok(None);
        };
        if !order.status().is_awaiting_payment() {
            return Ok(None);
        }

        // The payment settled but the order never followed.
        if let Some(payment) = self.payments.find(order_id).await? {
            let status = payment.status();
            if status.is_success() {
                let settled = self.settle(order_id, Verdict::Paid).await?;
                return Ok(settled.map(|_| Swept::Reconciled));
            }
            if status.is_failure() {
                let reason = payment.failure_reason().unwrap_or(status.as_str());
                let settled = self
                    .settle(
                        order_id,
                        Verdict::Failed {
                            reason,
                            cancel_reason: CancelReason::PaymentRejected,
                        },
                    )
                    .await?;
                return Ok(settled.map(|_| Swept::Reconciled));
            }
        }

        let window_elapsed = deadline <= now;
        let hold_lapsed = order
            .reservation_expires_at()
            .is_some_and(|expires_at| expires_at <= now);
        if !window_elapsed && !hold_lapsed {
            return Ok(None);
        }
        let cancel_reason = if window_elapsed {
            CancelReason::PaymentTimeout
        } else {
            CancelReason::ReservationLapsed
        };

        // Cancel at the provider first so a late verdict cannot settle it.
        let status = self.payments.cancel(order_id, cancel_reason.as_str()).await?;
        if status.is_some_and(|status| status.is_success()) {
            let settled = self.settle(order_id, Verdict::Paid).await?;
            return Ok(settled.map(|_| Swept::Reconciled));
        }

        tracing::info!(
            %order_id,
            %cancel_reason,
            "payment not completed in time, canceling order"
        );
        let settled = self
            .settle(
                order_id,
                Verdict::Failed {
                    reason: "payment not completed in time",
                    cancel_reason,
                },
            )
            .await?;
        Ok(settled.map(|_| Swept::TimedOut))
    }
}
