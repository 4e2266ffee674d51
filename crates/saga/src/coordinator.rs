//! Saga coordinator for order fulfillment.

use std::sync::Arc;
use std::time::Instant;

use common::{AggregateId, Clock, ProductId, SystemClock, retry_with_backoff};
use domain::{
    Aggregate, CancelOrder, CancelReason, DomainError, FailPayment, MarkDelivered, MarkPaid,
    MarkShipped, Order, OrderLine, OrderService, OrderStatus, PlaceOrder, RequestPayment, UserId,
    payment_id_for,
};
use event_store::{EventStore, Version};
use inventory::{InventoryLedger, LedgerError, ReservationLine};
use payment::{
    PaymentError, PaymentGateway, PaymentOutcome, PaymentStatusView, WebhookEvent, WebhookOutcome,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};
use crate::maintenance::PendingPayments;
use crate::order_fulfillment::{self, record_step};
use crate::policy::SagaPolicy;
use crate::services::Catalog;

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderItemRequest {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// How a payment ended, from the order's point of view.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Verdict<'a> {
    Paid,
    Failed {
        reason: &'a str,
        cancel_reason: CancelReason,
    },
}

/// Orchestrates order fulfillment across the order store, the inventory
/// ledger and the payment gateway.
///
/// Each step commits its local state before calling the next collaborator,
/// and no lock is held across those calls: concurrent requests for one
/// order race on the order's version, concurrent requests for one product
/// race inside the ledger.
pub struct SagaCoordinator<S: EventStore> {
    pub(crate) orders: OrderService<S>,
    pub(crate) payments: PaymentGateway<S>,
    pub(crate) ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn Catalog>,
    pub(crate) clock: Arc<dyn Clock>,
    policy: SagaPolicy,
    pub(crate) pending: Arc<Mutex<PendingPayments>>,
}

impl<S: EventStore + Clone> SagaCoordinator<S> {
    pub fn new(
        store: S,
        payments: PaymentGateway<S>,
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self::with_clock(store, payments, ledger, catalog, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: S,
        payments: PaymentGateway<S>,
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders: OrderService::with_clock(store, clock.clone()),
            payments,
            ledger,
            catalog,
            clock,
            policy: SagaPolicy::default(),
            pending: Arc::new(Mutex::new(PendingPayments::default())),
        }
    }
}

impl<S: EventStore> SagaCoordinator<S> {
    pub fn with_policy(mut self, policy: SagaPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &SagaPolicy {
        &self.policy
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentGateway<S> {
        &self.payments
    }

    pub fn ledger(&self) -> &Arc<dyn InventoryLedger> {
        &self.ledger
    }

    /// Creates an order and immediately runs [`Self::reserve_and_pay`].
    ///
    /// A stock or payment rejection leaves the order canceled and is
    /// returned as the error.
    pub async fn submit_order(
        &self,
        user_id: UserId,
        items: Vec<OrderItemRequest>,
    ) -> Result<Order> {
        let (order_id, _) = self.create(user_id, items).await?;
        self.reserve_and_pay(order_id).await
    }

    /// Prices the items from the catalog, snapshots those prices into the
    /// order lines and persists the order in `New`.
    pub async fn create_order(
        &self,
        user_id: UserId,
        items: Vec<OrderItemRequest>,
    ) -> Result<Order> {
        self.create(user_id, items).await.map(|(_, order)| order)
    }

    #[tracing::instrument(skip_all, fields(%user_id, items = items.len()))]
    async fn create(
        &self,
        user_id: UserId,
        items: Vec<OrderItemRequest>,
    ) -> Result<(AggregateId, Order)> {
        let started = Instant::now();
        validate_items(&items)?;

        let product_ids: Vec<ProductId> =
            items.iter().map(|item| item.product_id.clone()).collect();
        let prices = self
            .catalog
            .get_prices(&product_ids)
            .await
            .map_err(|err| SagaError::Validation(format!("price lookup failed: {err}")))?;

        let lines = items
            .into_iter()
            .map(|item| {
                let entry = prices.get(&item.product_id).ok_or_else(|| {
                    SagaError::Validation(format!("unknown product {}", item.product_id))
                })?;
                Ok(OrderLine::new(
                    item.product_id,
                    entry.name.clone(),
                    item.quantity,
                    entry.unit_price,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let cmd = PlaceOrder::new(user_id, lines);
        let order_id = cmd.order_id;
        let placed = retry_with_backoff(&self.policy.retry, DomainError::is_transient, || {
            let cmd = cmd.clone();
            async move { self.orders.place_order(cmd).await }
        })
        .await?;

        metrics::counter!("orders_created_total").increment(1);
        record_step(order_fulfillment::STEP_CREATE_ORDER, started);
        tracing::info!(%order_id, grand_total = %placed.aggregate.grand_total(), "order created");
        Ok((order_id, placed.aggregate))
    }

    /// Reserves stock for a `New` order, moves it to `PendingPayment` and
    /// asks the provider for payment.
    ///
    /// Insufficient stock cancels the order before any payment exists. A
    /// failed initiation releases the reservation, then cancels the order.
    /// Calling this again for an order already awaiting payment repeats only
    /// the (idempotent) initiation.
    #[tracing::instrument(skip(self), fields(saga_type = order_fulfillment::SAGA_TYPE))]
    pub async fn reserve_and_pay(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.orders.get(order_id).await?;
        match order.status() {
            OrderStatus::New => {}
            OrderStatus::PendingPayment => return self.initiate_payment(order_id, order).await,
            status => {
                return Err(SagaError::InvalidTransition {
                    status,
                    action: "reserve and pay for",
                });
            }
        }

        tracing::info!(
            step = order_fulfillment::STEP_RESERVE_INVENTORY,
            "saga step started"
        );
        let started = Instant::now();
        let requested: Vec<ReservationLine> = order
            .lines()
            .iter()
            .map(|line| ReservationLine::new(line.product_id.clone(), line.quantity))
            .collect();
        let lines = requested.as_slice();
        let reserved = retry_with_backoff(
            &self.policy.retry,
            LedgerError::is_transient,
            || async move { self.ledger.reserve(order_id, lines).await },
        )
        .await;
        record_step(order_fulfillment::STEP_RESERVE_INVENTORY, started);

        let reservation = match reserved {
            Ok(reservation) => {
                metrics::counter!("reservations_total", "outcome" => "reserved").increment(1);
                reservation
            }
            Err(err) if err.is_insufficient_stock() => {
                metrics::counter!("reservations_total", "outcome" => "insufficient_stock")
                    .increment(1);
                tracing::info!(error = %err, "stock unavailable, canceling order");
                self.cancel_order(order_id, order.version(), CancelReason::OutOfStock)
                    .await?;
                return Err(err.into());
            }
            Err(LedgerError::Closed { status, .. }) => {
                // An earlier attempt's hold was settled before the order
                // left `New`.
                metrics::counter!("reservations_total", "outcome" => "closed").increment(1);
                tracing::warn!(%status, "reservation already settled, canceling order");
                self.cancel_order(order_id, order.version(), CancelReason::ReservationLapsed)
                    .await?;
                return Err(SagaError::ReservationLapsed { order_id });
            }
            Err(err) => {
                metrics::counter!("reservations_total", "outcome" => "error").increment(1);
                tracing::warn!(error = %err, "reservation failed after retries, abandoning order");
                self.abandon_order(order_id, &order).await;
                return Err(err.into());
            }
        };

        let payment_id = payment_id_for(order_id);
        let expected_version = order.version();
        let reservation_expires_at = reservation.expires_at;
        let payment_deadline = self.clock.now() + self.policy.payment_window;
        let requested = retry_with_backoff(&self.policy.retry, DomainError::is_transient, || {
            self.orders.request_payment(RequestPayment {
                order_id,
                expected_version,
                payment_id,
                reservation_expires_at,
                payment_deadline,
            })
        })
        .await;
        let requested = match requested {
            Ok(requested) => requested,
            // A concurrent call for this order moved it on and owns the hold.
            Err(err) if err.is_conflict() => return Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "payment request not recorded, abandoning order");
                self.abandon_order(order_id, &order).await;
                return Err(err.into());
            }
        };

        tracing::info!(
            %payment_id,
            expires_at = %reservation_expires_at,
            "stock reserved, payment requested"
        );
        self.initiate_payment(order_id, requested.aggregate).await
    }

    async fn initiate_payment(&self, order_id: AggregateId, order: Order) -> Result<Order> {
        tracing::info!(
            step = order_fulfillment::STEP_INITIATE_PAYMENT,
            "saga step started"
        );
        let started = Instant::now();
        let amount = order.grand_total();
        let currency = self.policy.currency.as_str();
        let initiated = retry_with_backoff(
            &self.policy.retry,
            PaymentError::is_transient,
            || async move { self.payments.initiate(order_id, amount, currency).await },
        )
        .await;
        record_step(order_fulfillment::STEP_INITIATE_PAYMENT, started);

        match initiated {
            Ok(handle) => {
                tracing::info!(
                    payment_id = %handle.payment_id,
                    external_id = handle.external_id.as_deref().unwrap_or_default(),
                    "payment initiated"
                );
                Ok(order)
            }
            Err(err) => {
                tracing::warn!(error = %err, "payment initiation failed, compensating");
                self.compensate_initiation(order_id, &order).await?;
                Err(initiation_error(order_id, err))
            }
        }
    }

    /// Undoes a reservation whose payment never got started. The ledger is
    /// released before the order is canceled.
    async fn compensate_initiation(&self, order_id: AggregateId, order: &Order) -> Result<()> {
        tracing::info!(step = order_fulfillment::STEP_COMPENSATE, "saga step started");
        let started = Instant::now();

        if !self.release_reservation(order_id).await? {
            tracing::warn!(
                %order_id,
                "reservation already confirmed, order left to the payment outcome"
            );
            return Ok(());
        }
        if let Err(err) = self
            .payments
            .cancel(order_id, CancelReason::PaymentInitiationFailed.as_str())
            .await
        {
            tracing::warn!(error = %err, "could not cancel payment after failed initiation");
        }
        self.cancel_order(
            order_id,
            order.version(),
            CancelReason::PaymentInitiationFailed,
        )
        .await?;

        record_step(order_fulfillment::STEP_COMPENSATE, started);
        Ok(())
    }

    /// Cancels a `New` order whose reservation step could not finish.
    ///
    /// The hold is released first. If the ledger or the store is still
    /// failing the order stays `New` and the maintenance sweep cancels it
    /// once it is stale.
    async fn abandon_order(&self, order_id: AggregateId, order: &Order) {
        match self.release_reservation(order_id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                tracing::warn!(%order_id, error = %err, "release failed, order left for the sweep");
                return;
            }
        }
        if let Err(err) = self
            .cancel_order(order_id, order.version(), CancelReason::SystemError)
            .await
        {
            tracing::warn!(%order_id, error = %err, "cancel failed, order left for the sweep");
        }
    }

    /// Cancels an order that has sat in `New` past the stale threshold.
    pub(crate) async fn cancel_stale(&self, order_id: AggregateId) -> Result<Option<Order>> {
        let Some(order) = self.orders.find(order_id).await? else {
            return Ok(None);
        };
        if order.status() != OrderStatus::New {
            return Ok(None);
        }
        if !self.release_reservation(order_id).await? {
            return Ok(None);
        }

        tracing::info!(%order_id, "order never reserved stock, canceling");
        match self
            .cancel_order(order_id, order.version(), CancelReason::SystemError)
            .await
        {
            Ok(order) => Ok(Some(order)),
            // A late reserve_and_pay moved it on.
            Err(err) if err.is_conflict() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Applies a payment verdict to an order awaiting payment.
    ///
    /// Returns the settled order, or `None` when there was nothing to do:
    /// the outcome is still pending or the order already left
    /// `PendingPayment`.
    #[tracing::instrument(skip(self, outcome), fields(outcome = outcome.as_str()))]
    pub async fn on_payment_outcome(
        &self,
        order_id: AggregateId,
        outcome: &PaymentOutcome,
    ) -> Result<Option<Order>> {
        match outcome {
            PaymentOutcome::Pending => Ok(None),
            PaymentOutcome::Succeeded => self.settle(order_id, Verdict::Paid).await,
            PaymentOutcome::Failed { reason } => {
                self.settle(
                    order_id,
                    Verdict::Failed {
                        reason: reason.as_str(),
                        cancel_reason: CancelReason::PaymentRejected,
                    },
                )
                .await
            }
        }
    }

    /// Verifies and records a provider callback, then drives its order.
    ///
    /// A repeated delivery returns the stored outcome and touches nothing.
    /// Once the payment is recorded the delivery counts as accepted: a
    /// failure applying it to the order is logged and left to the
    /// reconciliation sweep.
    #[tracing::instrument(skip_all, fields(event_id = %event.event_id))]
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let outcome = self.payments.handle_webhook(event).await?;
        if outcome.duplicate {
            return Ok(outcome);
        }

        if let Err(err) = self
            .on_payment_outcome(outcome.order_id, &outcome.outcome)
            .await
        {
            tracing::error!(
                order_id = %outcome.order_id,
                error = %err,
                "applying payment outcome failed, left for reconciliation"
            );
        }
        Ok(outcome)
    }

    /// The order as its owner sees it.
    pub async fn get_status(&self, user_id: UserId, order_id: AggregateId) -> Result<Order> {
        let order = self
            .orders
            .find(order_id)
            .await?
            .ok_or_else(|| SagaError::order_not_found(order_id))?;
        if !order.is_owned_by(user_id) {
            return Err(SagaError::Forbidden { order_id });
        }
        Ok(order)
    }

    pub async fn payment_status(&self, order_id: AggregateId) -> Result<PaymentStatusView> {
        Ok(self.payments.get_status(order_id).await?)
    }

    /// Paid → Shipped. Without an expected version the current one is used.
    pub async fn mark_shipped(
        &self,
        order_id: AggregateId,
        tracking_number: String,
        expected_version: Option<Version>,
    ) -> Result<Order> {
        let expected_version = self.resolve_version(order_id, expected_version).await?;
        let shipped = self
            .orders
            .mark_shipped(MarkShipped {
                order_id,
                expected_version,
                tracking_number,
            })
            .await?;
        Ok(shipped.aggregate)
    }

    /// Shipped → Delivered.
    pub async fn mark_delivered(
        &self,
        order_id: AggregateId,
        expected_version: Option<Version>,
    ) -> Result<Order> {
        let expected_version = self.resolve_version(order_id, expected_version).await?;
        let delivered = self
            .orders
            .mark_delivered(MarkDelivered {
                order_id,
                expected_version,
            })
            .await?;
        record_terminal(OrderStatus::Delivered);
        Ok(delivered.aggregate)
    }

    async fn resolve_version(
        &self,
        order_id: AggregateId,
        expected_version: Option<Version>,
    ) -> Result<Version> {
        match expected_version {
            Some(version) => Ok(version),
            None => Ok(self.orders.get(order_id).await?.version()),
        }
    }

    pub(crate) async fn settle(
        &self,
        order_id: AggregateId,
        verdict: Verdict<'_>,
    ) -> Result<Option<Order>> {
        let order = self.orders.get(order_id).await?;
        if !order.status().is_awaiting_payment() {
            log_discrepancy(order_id, &order, verdict);
            return Ok(None);
        }

        tracing::info!(step = order_fulfillment::STEP_APPLY_OUTCOME, "saga step started");
        let started = Instant::now();
        let settled = match verdict {
            Verdict::Paid => self.complete_paid(order_id, &order).await,
            Verdict::Failed {
                reason,
                cancel_reason,
            } => {
                self.complete_failed(order_id, &order, reason, cancel_reason)
                    .await
            }
        };
        record_step(order_fulfillment::STEP_APPLY_OUTCOME, started);

        match settled {
            // Another path settled the order between our read and write.
            Err(err) if err.is_conflict() => {
                let current = self.orders.get(order_id).await?;
                if current.status().is_awaiting_payment() {
                    return Err(err);
                }
                log_discrepancy(order_id, &current, verdict);
                Ok(None)
            }
            other => other,
        }
    }

    async fn complete_paid(&self, order_id: AggregateId, order: &Order) -> Result<Option<Order>> {
        let confirmed = retry_with_backoff(
            &self.policy.retry,
            LedgerError::is_transient,
            || async move { self.ledger.confirm(order_id).await },
        )
        .await;
        match confirmed {
            Ok(_) => {}
            Err(err) if err.is_lapsed() => {
                tracing::warn!(
                    %order_id,
                    error = %err,
                    "payment succeeded after the reservation lapsed, refund required"
                );
                return self
                    .complete_failed(
                        order_id,
                        order,
                        "reservation lapsed before payment completed",
                        CancelReason::ReservationLapsed,
                    )
                    .await;
            }
            Err(err) => return Err(err.into()),
        }

        let expected_version = order.version();
        let payment_id = order
            .payment_id()
            .unwrap_or_else(|| payment_id_for(order_id));
        let paid = retry_with_backoff(&self.policy.retry, DomainError::is_transient, || async move {
            self.orders
                .mark_paid(MarkPaid {
                    order_id,
                    expected_version,
                    payment_id,
                })
                .await
        })
        .await?;

        record_terminal(OrderStatus::Paid);
        tracing::info!(%order_id, "order paid");
        Ok(Some(paid.aggregate))
    }

    async fn complete_failed(
        &self,
        order_id: AggregateId,
        order: &Order,
        reason: &str,
        cancel_reason: CancelReason,
    ) -> Result<Option<Order>> {
        if !self.release_reservation(order_id).await? {
            tracing::warn!(%order_id, "reservation already confirmed, failure outcome ignored");
            return Ok(None);
        }

        let expected_version = order.version();
        let failed = retry_with_backoff(
            &self.policy.retry,
            DomainError::is_transient,
            || async move {
                self.orders
                    .fail_payment(FailPayment {
                        order_id,
                        expected_version,
                        reason: reason.to_string(),
                        cancel_reason,
                    })
                    .await
            },
        )
        .await?;

        record_terminal(OrderStatus::Canceled);
        tracing::info!(%order_id, %cancel_reason, "payment failed, order canceled");
        Ok(Some(failed.aggregate))
    }

    /// `false` when the reservation was already confirmed and must stay.
    async fn release_reservation(&self, order_id: AggregateId) -> Result<bool> {
        let released = retry_with_backoff(
            &self.policy.retry,
            LedgerError::is_transient,
            || async move { self.ledger.release(order_id).await },
        )
        .await;
        match released {
            Ok(_) | Err(LedgerError::NotFound { .. }) => Ok(true),
            Err(LedgerError::AlreadyConfirmed { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn cancel_order(
        &self,
        order_id: AggregateId,
        expected_version: Version,
        reason: CancelReason,
    ) -> Result<Order> {
        let canceled = retry_with_backoff(
            &self.policy.retry,
            DomainError::is_transient,
            || async move {
                self.orders
                    .cancel(CancelOrder {
                        order_id,
                        expected_version,
                        reason,
                    })
                    .await
            },
        )
        .await?;

        record_terminal(OrderStatus::Canceled);
        tracing::info!(%order_id, %reason, "order canceled");
        Ok(canceled.aggregate)
    }
}

fn validate_items(items: &[OrderItemRequest]) -> Result<()> {
    if items.is_empty() {
        return Err(SagaError::Validation("order has no items".into()));
    }
    if let Some(item) = items.iter().find(|item| item.quantity == 0) {
        return Err(SagaError::Validation(format!(
            "quantity for {} must be positive",
            item.product_id
        )));
    }
    Ok(())
}

fn initiation_error(order_id: AggregateId, err: PaymentError) -> SagaError {
    if err.is_transient() {
        return SagaError::PaymentUnavailable {
            order_id,
            message: err.to_string(),
        };
    }
    match err {
        PaymentError::Validation(message) => SagaError::Validation(message),
        other => SagaError::PaymentRejected {
            order_id,
            reason: other.to_string(),
        },
    }
}

fn log_discrepancy(order_id: AggregateId, order: &Order, verdict: Verdict<'_>) {
    if matches!(verdict, Verdict::Paid) && order.status() == OrderStatus::Canceled {
        tracing::warn!(%order_id, "payment succeeded for a canceled order, refund required");
    } else {
        tracing::info!(
            %order_id,
            status = %order.status(),
            "order no longer awaiting payment, outcome ignored"
        );
    }
}

fn record_terminal(status: OrderStatus) {
    metrics::counter!("orders_terminal_total", "status" => status.as_str()).increment(1);
}
