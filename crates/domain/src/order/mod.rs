//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    CancelReason, OrderCanceledData, OrderDeliveredData, OrderEvent, OrderPaidData,
    OrderPaymentFailedData, OrderPlacedData, OrderShippedData, PaymentRequestedData,
};
pub use service::OrderService;
pub use state::OrderStatus;
pub use value_objects::{OrderLine, UserId};

use common::AggregateId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order already placed")]
    AlreadyPlaced,

    #[error("Order has not been placed")]
    NotPlaced,

    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity for {product_id}: must be greater than 0")]
    InvalidQuantity { product_id: String },

    #[error("Invalid price for {product_id}: {price} is negative")]
    InvalidPrice { product_id: String, price: i64 },

    #[error("Product {product_id} is listed more than once")]
    DuplicateProduct { product_id: String },

    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Invalid state transition: cannot {action} from {current}")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    #[error("Payment {actual} does not belong to this order (expected {expected:?})")]
    PaymentMismatch {
        expected: Option<AggregateId>,
        actual: AggregateId,
    },

    #[error("Tracking number is required")]
    TrackingNumberRequired,
}

impl OrderError {
    /// Errors caused by the request itself rather than by the order's state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::NoItems
                | OrderError::InvalidQuantity { .. }
                | OrderError::InvalidPrice { .. }
                | OrderError::DuplicateProduct { .. }
                | OrderError::TotalOverflow
                | OrderError::TrackingNumberRequired
        )
    }
}
