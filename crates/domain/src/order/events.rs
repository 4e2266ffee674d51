//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;

use super::{OrderLine, UserId};

/// Why an order ended up `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    OutOfStock,
    PaymentRejected,
    PaymentInitiationFailed,
    PaymentTimeout,
    ReservationLapsed,
    /// Stock could not be reserved or the payment requested because a
    /// collaborator kept failing.
    SystemError,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::OutOfStock => "out_of_stock",
            CancelReason::PaymentRejected => "payment_rejected",
            CancelReason::PaymentInitiationFailed => "payment_initiation_failed",
            CancelReason::PaymentTimeout => "payment_timeout",
            CancelReason::ReservationLapsed => "reservation_lapsed",
            CancelReason::SystemError => "system_error",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderPlaced(OrderPlacedData),
    PaymentRequested(PaymentRequestedData),
    OrderPaid(OrderPaidData),
    OrderPaymentFailed(OrderPaymentFailedData),
    OrderCanceled(OrderCanceledData),
    OrderShipped(OrderShippedData),
    OrderDelivered(OrderDeliveredData),
}

impl OrderEvent {
    pub const PLACED: &'static str = "OrderPlaced";
    pub const PAYMENT_REQUESTED: &'static str = "PaymentRequested";
    pub const PAID: &'static str = "OrderPaid";
    pub const PAYMENT_FAILED: &'static str = "OrderPaymentFailed";
    pub const CANCELED: &'static str = "OrderCanceled";
    pub const SHIPPED: &'static str = "OrderShipped";
    pub const DELIVERED: &'static str = "OrderDelivered";
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => Self::PLACED,
            OrderEvent::PaymentRequested(_) => Self::PAYMENT_REQUESTED,
            OrderEvent::OrderPaid(_) => Self::PAID,
            OrderEvent::OrderPaymentFailed(_) => Self::PAYMENT_FAILED,
            OrderEvent::OrderCanceled(_) => Self::CANCELED,
            OrderEvent::OrderShipped(_) => Self::SHIPPED,
            OrderEvent::OrderDelivered(_) => Self::DELIVERED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub grand_total: Money,
    pub created_at: DateTime<Utc>,
}

/// Stock was reserved and a payment was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub payment_id: AggregateId,
    pub reservation_expires_at: DateTime<Utc>,
    /// After this instant the order is timed out if no outcome arrived.
    pub payment_deadline: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub payment_id: AggregateId,
    pub user_id: UserId,
    pub grand_total: Money,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaymentFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCanceledData {
    pub reason: CancelReason,
    pub user_id: UserId,
    pub canceled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    pub delivered_at: DateTime<Utc>,
}

// Convenience constructors
impl OrderEvent {
    pub fn order_placed(
        order_id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        grand_total: Money,
        at: DateTime<Utc>,
    ) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            user_id,
            lines,
            grand_total,
            created_at: at,
        })
    }

    pub fn payment_requested(
        payment_id: AggregateId,
        reservation_expires_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        OrderEvent::PaymentRequested(PaymentRequestedData {
            payment_id,
            reservation_expires_at,
            payment_deadline,
            requested_at: at,
        })
    }

    pub fn order_paid(
        payment_id: AggregateId,
        user_id: UserId,
        grand_total: Money,
        at: DateTime<Utc>,
    ) -> Self {
        OrderEvent::OrderPaid(OrderPaidData {
            payment_id,
            user_id,
            grand_total,
            paid_at: at,
        })
    }

    pub fn order_payment_failed(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        OrderEvent::OrderPaymentFailed(OrderPaymentFailedData {
            reason: reason.into(),
            failed_at: at,
        })
    }

    pub fn order_canceled(reason: CancelReason, user_id: UserId, at: DateTime<Utc>) -> Self {
        OrderEvent::OrderCanceled(OrderCanceledData {
            reason,
            user_id,
            canceled_at: at,
        })
    }

    pub fn order_shipped(tracking_number: impl Into<String>, at: DateTime<Utc>) -> Self {
        OrderEvent::OrderShipped(OrderShippedData {
            tracking_number: tracking_number.into(),
            shipped_at: at,
        })
    }

    pub fn order_delivered(at: DateTime<Utc>) -> Self {
        OrderEvent::OrderDelivered(OrderDeliveredData { delivered_at: at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = OrderEvent::order_canceled(CancelReason::OutOfStock, UserId::new(), Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "OrderCanceled");
        assert_eq!(json["data"]["reason"], "out_of_stock");
        assert_eq!(event.event_type(), OrderEvent::CANCELED);
    }

    #[test]
    fn placed_event_keeps_line_order() {
        let lines = vec![
            OrderLine::new("B", "Bolt", 1, Money::from_minor(10)),
            OrderLine::new("A", "Anchor", 2, Money::from_minor(20)),
        ];
        let event = OrderEvent::order_placed(
            AggregateId::new(),
            UserId::new(),
            lines,
            Money::from_minor(50),
            Utc::now(),
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        let OrderEvent::OrderPlaced(data) = back else {
            panic!("wrong variant");
        };
        assert_eq!(data.lines[0].product_id.as_str(), "B");
        assert_eq!(data.lines[1].product_id.as_str(), "A");
    }
}
