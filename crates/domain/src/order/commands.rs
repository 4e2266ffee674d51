//! Order commands.
//!
//! Every command after `PlaceOrder` names the version the caller read.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;

use crate::command::Command;

use super::{CancelReason, Order, OrderLine, UserId};

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
}

impl PlaceOrder {
    /// A new order with a generated id.
    pub fn new(user_id: UserId, lines: Vec<OrderLine>) -> Self {
        Self {
            order_id: AggregateId::new(),
            user_id,
            lines,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestPayment {
    pub order_id: AggregateId,
    pub expected_version: Version,
    pub payment_id: AggregateId,
    pub reservation_expires_at: DateTime<Utc>,
    pub payment_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkPaid {
    pub order_id: AggregateId,
    pub expected_version: Version,
    pub payment_id: AggregateId,
}

#[derive(Debug, Clone)]
pub struct FailPayment {
    pub order_id: AggregateId,
    pub expected_version: Version,
    pub reason: String,
    pub cancel_reason: CancelReason,
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub expected_version: Version,
    pub reason: CancelReason,
}

#[derive(Debug, Clone)]
pub struct MarkShipped {
    pub order_id: AggregateId,
    pub expected_version: Version,
    pub tracking_number: String,
}

#[derive(Debug, Clone)]
pub struct MarkDelivered {
    pub order_id: AggregateId,
    pub expected_version: Version,
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

macro_rules! versioned_order_command {
    ($($name:ident),+ $(,)?) => {
        $(
            impl Command for $name {
                type Aggregate = Order;

                fn aggregate_id(&self) -> AggregateId {
                    self.order_id
                }

                fn expected_version(&self) -> Option<Version> {
                    Some(self.expected_version)
                }
            }
        )+
    };
}

versioned_order_command!(
    RequestPayment,
    MarkPaid,
    FailPayment,
    CancelOrder,
    MarkShipped,
    MarkDelivered,
);
