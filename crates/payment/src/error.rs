use domain::{DomainError, PaymentStateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation error: {0}")]
    Validation(String),

    /// The webhook signature did not verify. Nothing was recorded.
    #[error("invalid webhook signature for event {event_id}")]
    InvalidSignature { event_id: String },

    #[error("no payment matches {reference}")]
    UnknownPayment { reference: String },

    #[error("no payment for order {order_id}")]
    NotFound { order_id: String },

    #[error("payment provider error: {message}")]
    Provider { message: String, transient: bool },

    #[error(transparent)]
    Domain(DomainError),
}

impl PaymentError {
    pub fn provider(message: impl Into<String>, transient: bool) -> Self {
        PaymentError::Provider {
            message: message.into(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Provider { transient, .. } => *transient,
            PaymentError::Domain(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PaymentError::Domain(err) if err.is_conflict())
    }
}

impl From<DomainError> for PaymentError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Payment(
                state @ (PaymentStateError::InvalidAmount { .. }
                | PaymentStateError::InvalidCurrency { .. }),
            ) => PaymentError::Validation(state.to_string()),
            other => PaymentError::Domain(other),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.status().is_some_and(|s| s.is_server_error());
        PaymentError::provider(err.to_string(), transient)
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
