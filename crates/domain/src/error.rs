//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::order::OrderError;
use crate::payment::PaymentStateError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentStateError),

    /// The aggregate moved on since the caller read it. Reload and retry,
    /// or give up.
    #[error("Version conflict on {aggregate_id}: expected {expected}, found {actual}")]
    Conflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    #[error("{aggregate_type} {aggregate_id} not found")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// A creation command hit an aggregate that already exists.
    #[error("{aggregate_type} {aggregate_id} already exists")]
    AlreadyExists {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::AggregateNotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DomainError::AlreadyExists { .. })
    }

    /// Infrastructure hiccup worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::EventStore(err) if err.is_transient())
    }
}

impl From<EventStoreError> for DomainError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}
