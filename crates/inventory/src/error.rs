use common::{AggregateId, ProductId};
use thiserror::Error;

use crate::reservation::ReservationStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "insufficient stock for {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    #[error("no reservation for order {order_id}")]
    NotFound { order_id: AggregateId },

    #[error("reservation for order {order_id} is already confirmed")]
    AlreadyConfirmed { order_id: AggregateId },

    #[error("reservation for order {order_id} was released")]
    Released { order_id: AggregateId },

    #[error("reservation for order {order_id} expired")]
    Expired { order_id: AggregateId },

    /// A reserve for an order whose reservation is no longer held.
    #[error("reservation for order {order_id} is already {status}")]
    Closed {
        order_id: AggregateId,
        status: ReservationStatus,
    },

    #[error("invalid reservation: {0}")]
    InvalidRequest(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, LedgerError::InsufficientStock { .. })
    }

    /// True when the reservation can no longer be confirmed because its hold
    /// lapsed or was released.
    pub fn is_lapsed(&self) -> bool {
        matches!(
            self,
            LedgerError::Expired { .. } | LedgerError::Released { .. }
        )
    }

    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
