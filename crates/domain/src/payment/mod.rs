//! Payment aggregate.
//!
//! One payment per order. Its id is derived from the order id, which makes
//! the order id the idempotency key for initiation.

mod aggregate;
mod events;
mod state;

pub use aggregate::Payment;
pub use events::{
    PaymentAuthorizedData, PaymentCanceledData, PaymentCapturedData, PaymentEvent,
    PaymentFailedData, PaymentInitiatedData, PaymentRejectedData, ProviderAcknowledgedData,
};
pub use state::PaymentStatus;

use common::AggregateId;
use thiserror::Error;

/// Derives the payment id for an order.
pub fn payment_id_for(order_id: AggregateId) -> AggregateId {
    AggregateId::derived("payment", order_id)
}

#[derive(Debug, Error)]
pub enum PaymentStateError {
    #[error("Payment already initiated")]
    AlreadyInitiated,

    #[error("Payment has not been initiated")]
    NotInitiated,

    #[error("Invalid payment amount {amount}: must be positive")]
    InvalidAmount { amount: i64 },

    #[error("Invalid currency code {currency:?}")]
    InvalidCurrency { currency: String },

    #[error("Provider reference {received} conflicts with recorded {current}")]
    ExternalIdMismatch { current: String, received: String },
}
