//! Order aggregate implementation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::money::Money;

use super::{CancelReason, OrderError, OrderEvent, OrderLine, OrderStatus, UserId};

/// Order aggregate root.
///
/// Identity, the line snapshot and the grand total are written once by
/// `OrderPlaced`. Everything after that is a status transition.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<AggregateId>,
    version: Version,
    user_id: Option<UserId>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    grand_total: Money,
    created_at: Option<DateTime<Utc>>,
    payment_id: Option<AggregateId>,
    payment_deadline: Option<DateTime<Utc>>,
    reservation_expires_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    cancel_reason: Option<CancelReason>,
    tracking_number: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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
            OrderEvent::OrderPlaced(data) => {
                self.id = Some(data.order_id);
                self.user_id = Some(data.user_id);
                self.lines = data.lines;
                self.grand_total = data.grand_total;
                self.created_at = Some(data.created_at);
                self.updated_at = Some(data.created_at);
                self.status = OrderStatus::New;
            }
            OrderEvent::PaymentRequested(data) => {
                self.payment_id = Some(data.payment_id);
                self.payment_deadline = Some(data.payment_deadline);
                self.reservation_expires_at = Some(data.reservation_expires_at);
                self.updated_at = Some(data.requested_at);
                self.status = OrderStatus::PendingPayment;
            }
            OrderEvent::OrderPaid(data) => {
                self.updated_at = Some(data.paid_at);
                self.status = OrderStatus::Paid;
            }
            OrderEvent::OrderPaymentFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.updated_at = Some(data.failed_at);
                self.status = OrderStatus::PaymentFailed;
            }
            OrderEvent::OrderCanceled(data) => {
                self.cancel_reason = Some(data.reason);
                self.updated_at = Some(data.canceled_at);
                self.status = OrderStatus::Canceled;
            }
            OrderEvent::OrderShipped(data) => {
                self.tracking_number = Some(data.tracking_number);
                self.updated_at = Some(data.shipped_at);
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::OrderDelivered(data) => {
                self.updated_at = Some(data.delivered_at);
                self.status = OrderStatus::Delivered;
            }
        }
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn grand_total(&self) -> Money {
        self.grand_total
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn payment_deadline(&self) -> Option<DateTime<Utc>> {
        self.payment_deadline
    }

    pub fn reservation_expires_at(&self) -> Option<DateTime<Utc>> {
        self.reservation_expires_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn require_user(&self) -> Result<UserId, OrderError> {
        self.user_id.ok_or(OrderError::NotPlaced)
    }

    fn transition_error(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current: self.status,
            action,
        }
    }
}

// Command methods (return events)
impl Order {
    /// Places an order from catalog-priced lines.
    ///
    /// Rejects an empty order, zero quantities, negative prices, a product
    /// listed twice and a total that does not fit in `i64`.
    pub fn place(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut seen = HashSet::new();
        let mut grand_total = Money::zero();
        for line in &lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id.to_string(),
                });
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product_id.to_string(),
                    price: line.unit_price.minor(),
                });
            }
            if !seen.insert(&line.product_id) {
                return Err(OrderError::DuplicateProduct {
                    product_id: line.product_id.to_string(),
                });
            }
            grand_total = line
                .line_total()
                .and_then(|total| grand_total.checked_add(total))
                .ok_or(OrderError::TotalOverflow)?;
        }

        Ok(vec![OrderEvent::order_placed(
            order_id,
            user_id,
            lines,
            grand_total,
            now,
        )])
    }

    pub fn request_payment(
        &self,
        payment_id: AggregateId,
        reservation_expires_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_user()?;
        if !self.status.can_request_payment() {
            return Err(self.transition_error("request payment"));
        }

        Ok(vec![OrderEvent::payment_requested(
            payment_id,
            reservation_expires_at,
            payment_deadline,
            now,
        )])
    }

    pub fn mark_paid(
        &self,
        payment_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let user_id = self.require_user()?;
        if !self.status.is_awaiting_payment() {
            return Err(self.transition_error("mark paid"));
        }
        if self.payment_id != Some(payment_id) {
            return Err(OrderError::PaymentMismatch {
                expected: self.payment_id,
                actual: payment_id,
            });
        }

        Ok(vec![OrderEvent::order_paid(
            payment_id,
            user_id,
            self.grand_total,
            now,
        )])
    }

    /// Records the failed payment and cancels in one batch, so no reader
    /// ever observes an order parked in `PaymentFailed`.
    pub fn fail_payment(
        &self,
        reason: impl Into<String>,
        cancel_reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let user_id = self.require_user()?;
        if !self.status.is_awaiting_payment() {
            return Err(self.transition_error("fail payment"));
        }

        Ok(vec![
            OrderEvent::order_payment_failed(reason, now),
            OrderEvent::order_canceled(cancel_reason, user_id, now),
        ])
    }

    pub fn cancel(
        &self,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let user_id = self.require_user()?;
        if !self.status.can_cancel() {
            return Err(self.transition_error("cancel"));
        }

        Ok(vec![OrderEvent::order_canceled(reason, user_id, now)])
    }

    pub fn ship(
        &self,
        tracking_number: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_user()?;
        if !self.status.can_ship() {
            return Err(self.transition_error("ship"));
        }
        let tracking_number = tracking_number.into();
        if tracking_number.trim().is_empty() {
            return Err(OrderError::TrackingNumberRequired);
        }

        Ok(vec![OrderEvent::order_shipped(tracking_number, now)])
    }

    pub fn deliver(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_user()?;
        if !self.status.can_deliver() {
            return Err(self.transition_error("deliver"));
        }

        Ok(vec![OrderEvent::order_delivered(now)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<OrderLine> {
        vec![
            OrderLine::new("SKU-1", "Kettle", 2, Money::from_minor(2_500)),
            OrderLine::new("SKU-2", "Mug", 3, Money::from_minor(400)),
        ]
    }

    fn placed() -> Order {
        let mut order = Order::default();
        let events = order
            .place(AggregateId::new(), UserId::new(), lines(), Utc::now())
            .unwrap();
        order.apply_events(events);
        order
    }

    fn pending(payment_id: AggregateId) -> Order {
        let mut order = placed();
        let now = Utc::now();
        let events = order
            .request_payment(payment_id, now, now + chrono::Duration::minutes(15), now)
            .unwrap();
        order.apply_events(events);
        order
    }

    #[test]
    fn place_computes_grand_total_from_snapshot() {
        let order = placed();
        assert_eq!(order.status(), OrderStatus::New);
        assert_eq!(order.grand_total(), Money::from_minor(6_200));
        assert_eq!(order.lines().len(), 2);
    }

    #[test]
    fn place_rejects_empty_order() {
        let result = Order::default().place(AggregateId::new(), UserId::new(), vec![], Utc::now());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn place_rejects_zero_quantity() {
        let lines = vec![OrderLine::new("SKU-1", "Kettle", 0, Money::from_minor(1))];
        let result = Order::default().place(AggregateId::new(), UserId::new(), lines, Utc::now());
        assert!(matches!(result, Err(OrderError::InvalidQuantity { .. })));
    }

    #[test]
    fn place_rejects_negative_price() {
        let lines = vec![OrderLine::new("SKU-1", "Kettle", 1, Money::from_minor(-1))];
        let result = Order::default().place(AggregateId::new(), UserId::new(), lines, Utc::now());
        assert!(matches!(result, Err(OrderError::InvalidPrice { .. })));
    }

    #[test]
    fn place_rejects_duplicate_products() {
        let lines = vec![
            OrderLine::new("SKU-1", "Kettle", 1, Money::from_minor(1)),
            OrderLine::new("SKU-1", "Kettle", 2, Money::from_minor(1)),
        ];
        let result = Order::default().place(AggregateId::new(), UserId::new(), lines, Utc::now());
        assert!(matches!(result, Err(OrderError::DuplicateProduct { .. })));
    }

    #[test]
    fn place_rejects_overflowing_total() {
        let lines = vec![
            OrderLine::new("SKU-1", "Gold", u32::MAX, Money::from_minor(i64::MAX / 2)),
        ];
        let result = Order::default().place(AggregateId::new(), UserId::new(), lines, Utc::now());
        assert!(matches!(result, Err(OrderError::TotalOverflow)));
    }

    #[test]
    fn place_twice_is_rejected() {
        let order = placed();
        let result = order.place(AggregateId::new(), UserId::new(), lines(), Utc::now());
        assert!(matches!(result, Err(OrderError::AlreadyPlaced)));
    }

    #[test]
    fn happy_path_reaches_delivered() {
        let payment_id = AggregateId::new();
        let mut order = pending(payment_id);
        assert_eq!(order.payment_id(), Some(payment_id));

        let now = Utc::now();
        order.apply_events(order.mark_paid(payment_id, now).unwrap());
        assert_eq!(order.status(), OrderStatus::Paid);

        order.apply_events(order.ship("TRACK-1", now).unwrap());
        assert_eq!(order.tracking_number(), Some("TRACK-1"));

        order.apply_events(order.deliver(now).unwrap());
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.is_terminal());
    }

    #[test]
    fn fail_payment_emits_failed_then_canceled() {
        let order = pending(AggregateId::new());
        let events = order
            .fail_payment("card declined", CancelReason::PaymentRejected, Utc::now())
            .unwrap();

        assert!(matches!(events[0], OrderEvent::OrderPaymentFailed(_)));
        assert!(matches!(events[1], OrderEvent::OrderCanceled(_)));

        let mut order = order;
        order.apply_events(events);
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.failure_reason(), Some("card declined"));
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentRejected));
    }

    #[test]
    fn mark_paid_requires_pending_payment() {
        let order = placed();
        let result = order.mark_paid(AggregateId::new(), Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidStateTransition {
                current: OrderStatus::New,
                ..
            })
        ));
    }

    #[test]
    fn mark_paid_rejects_foreign_payment() {
        let order = pending(AggregateId::new());
        let result = order.mark_paid(AggregateId::new(), Utc::now());
        assert!(matches!(result, Err(OrderError::PaymentMismatch { .. })));
    }

    #[test]
    fn canceled_order_rejects_everything() {
        let mut order = placed();
        order.apply_events(order.cancel(CancelReason::OutOfStock, Utc::now()).unwrap());

        assert!(order.cancel(CancelReason::OutOfStock, Utc::now()).is_err());
        assert!(
            order
                .request_payment(AggregateId::new(), Utc::now(), Utc::now(), Utc::now())
                .is_err()
        );
        assert!(order.ship("T", Utc::now()).is_err());
    }

    #[test]
    fn ship_requires_tracking_number() {
        let payment_id = AggregateId::new();
        let mut order = pending(payment_id);
        order.apply_events(order.mark_paid(payment_id, Utc::now()).unwrap());

        assert!(matches!(
            order.ship("  ", Utc::now()),
            Err(OrderError::TrackingNumberRequired)
        ));
    }

    #[test]
    fn commands_on_unplaced_order_fail() {
        let order = Order::default();
        assert!(matches!(
            order.cancel(CancelReason::OutOfStock, Utc::now()),
            Err(OrderError::NotPlaced)
        ));
    }
}
