//! Saga error types.
//!
//! Every error a caller can see maps to a stable [`SagaError::reason_code`]
//! so clients can tell a stock rejection from a payment rejection from a
//! system error worth retrying.

use common::{AggregateId, ProductId};
use domain::{DomainError, OrderError, OrderStatus, PaymentStateError};
use inventory::LedgerError;
use payment::PaymentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SagaError {
    /// Bad input. Not retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("out of stock: {product_id} requested {requested}, available {available}")]
    OutOfStock {
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    #[error("payment for order {order_id} was rejected: {reason}")]
    PaymentRejected { order_id: AggregateId, reason: String },

    /// The provider could not be reached. The order was compensated.
    #[error("payment provider unavailable for order {order_id}: {message}")]
    PaymentUnavailable {
        order_id: AggregateId,
        message: String,
    },

    /// The order moved on since it was read. Reload and retry.
    #[error("order {order_id} was modified concurrently")]
    Conflict { order_id: AggregateId },

    #[error("cannot {action} an order in status {status}")]
    InvalidTransition {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("reservation for order {order_id} lapsed")]
    ReservationLapsed { order_id: AggregateId },

    #[error("invalid webhook signature for event {event_id}")]
    InvalidSignature { event_id: String },

    #[error("no payment matches {reference}")]
    UnknownPayment { reference: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("order {order_id} belongs to another user")]
    Forbidden { order_id: AggregateId },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Domain(DomainError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Payment(PaymentError),
}

impl SagaError {
    pub fn order_not_found(order_id: AggregateId) -> Self {
        SagaError::NotFound(format!("order {order_id}"))
    }

    /// Stable, machine-readable reason surfaced to clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "validation",
            SagaError::OutOfStock { .. } => "out_of_stock",
            SagaError::PaymentRejected { .. } => "payment_rejected",
            SagaError::PaymentUnavailable { .. } => "payment_unavailable",
            SagaError::Conflict { .. }
            | SagaError::InvalidTransition { .. }
            | SagaError::ReservationLapsed { .. } => "conflict",
            SagaError::InvalidSignature { .. } => "invalid_signature",
            SagaError::UnknownPayment { .. } => "unknown_payment",
            SagaError::NotFound(_) => "not_found",
            SagaError::Forbidden { .. } => "forbidden",
            SagaError::AlreadyExists(_) => "already_exists",
            SagaError::Domain(_) | SagaError::Ledger(_) | SagaError::Payment(_) => {
                "system_error_retry"
            }
        }
    }

    /// Store, database or network hiccups that a retry may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::PaymentUnavailable { .. } => true,
            SagaError::Domain(err) => err.is_transient(),
            SagaError::Ledger(err) => err.is_transient(),
            SagaError::Payment(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::Conflict { .. })
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Conflict { aggregate_id, .. } => SagaError::Conflict {
                order_id: aggregate_id,
            },
            DomainError::AggregateNotFound {
                aggregate_type,
                aggregate_id,
            } => SagaError::NotFound(format!("{} {aggregate_id}", aggregate_type.to_lowercase())),
            DomainError::AlreadyExists {
                aggregate_type,
                aggregate_id,
            } => SagaError::AlreadyExists(format!(
                "{} {aggregate_id}",
                aggregate_type.to_lowercase()
            )),
            DomainError::Order(order) if order.is_validation() => {
                SagaError::Validation(order.to_string())
            }
            DomainError::Order(OrderError::InvalidStateTransition { current, action }) => {
                SagaError::InvalidTransition {
                    status: current,
                    action,
                }
            }
            DomainError::Order(OrderError::AlreadyPlaced) => {
                SagaError::AlreadyExists("order".into())
            }
            DomainError::Payment(
                state @ (PaymentStateError::InvalidAmount { .. }
                | PaymentStateError::InvalidCurrency { .. }),
            ) => SagaError::Validation(state.to_string()),
            other => SagaError::Domain(other),
        }
    }
}

impl From<LedgerError> for SagaError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => SagaError::OutOfStock {
                product_id,
                requested,
                available,
            },
            LedgerError::InvalidRequest(message) => SagaError::Validation(message),
            LedgerError::Expired { order_id } | LedgerError::Released { order_id } => {
                SagaError::ReservationLapsed { order_id }
            }
            other => SagaError::Ledger(other),
        }
    }
}

impl From<PaymentError> for SagaError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(message) => SagaError::Validation(message),
            PaymentError::InvalidSignature { event_id } => SagaError::InvalidSignature { event_id },
            PaymentError::UnknownPayment { reference } => SagaError::UnknownPayment { reference },
            PaymentError::NotFound { order_id } => {
                SagaError::NotFound(format!("payment for order {order_id}"))
            }
            PaymentError::Domain(domain) if domain.is_conflict() => SagaError::from(domain),
            other => SagaError::Payment(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
