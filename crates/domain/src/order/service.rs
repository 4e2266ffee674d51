//! Order service: the Order Aggregate Store's public surface.

use std::sync::Arc;

use common::{AggregateId, Clock, SystemClock};
use event_store::{EventStore, Version};

use crate::command::{Command, CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    CancelOrder, FailPayment, MarkDelivered, MarkPaid, MarkShipped, Order, OrderError, OrderEvent,
    PlaceOrder, RequestPayment,
};

/// Creates orders and drives their status transitions.
///
/// Every transition is version-guarded: the command carries the version the
/// caller read and a concurrent transition surfaces as
/// [`DomainError::Conflict`].
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            handler: CommandHandler::new(store),
            clock,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    pub async fn get(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.handler.get(order_id).await
    }

    pub async fn find(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(order_id = %cmd.order_id, user_id = %cmd.user_id)
    )]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        let PlaceOrder {
            order_id,
            user_id,
            lines,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.place(order_id, user_id, lines, now))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn request_payment(
        &self,
        cmd: RequestPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| {
            order.request_payment(
                cmd.payment_id,
                cmd.reservation_expires_at,
                cmd.payment_deadline,
                now,
            )
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_paid(&self, cmd: MarkPaid) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| order.mark_paid(cmd.payment_id, now))
            .await
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(order_id = %cmd.order_id, reason = %cmd.cancel_reason)
    )]
    pub async fn fail_payment(
        &self,
        cmd: FailPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| {
            order.fail_payment(cmd.reason.clone(), cmd.cancel_reason, now)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, reason = %cmd.reason))]
    pub async fn cancel(&self, cmd: CancelOrder) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| order.cancel(cmd.reason, now)).await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_shipped(
        &self,
        cmd: MarkShipped,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| order.ship(cmd.tracking_number.clone(), now))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_delivered(
        &self,
        cmd: MarkDelivered,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.run(&cmd, |order| order.deliver(now)).await
    }

    async fn run<C, F>(&self, cmd: &C, command_fn: F) -> Result<CommandResult<Order>, DomainError>
    where
        C: Command<Aggregate = Order>,
        F: FnOnce(&Order) -> Result<Vec<OrderEvent>, OrderError>,
    {
        let order_id = cmd.aggregate_id();
        let result = match cmd.expected_version() {
            Some(expected) => {
                self.handler
                    .execute_expecting(order_id, expected, command_fn)
                    .await
            }
            None => self.handler.execute(order_id, command_fn).await,
        };

        result.map_err(|err| match err {
            DomainError::Order(OrderError::NotPlaced) => not_found(order_id),
            DomainError::Conflict { actual, .. } if actual == Version::initial() => {
                not_found(order_id)
            }
            other => other,
        })
    }
}

fn not_found(order_id: AggregateId) -> DomainError {
    DomainError::AggregateNotFound {
        aggregate_type: "Order",
        aggregate_id: order_id,
    }
}

impl<S: EventStore + Clone> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            clock: self.clock.clone(),
        }
    }
}
