use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] sqlx::Error),

    #[error("Malformed order event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A subscriber refused or failed to take a message.
    #[error("Delivery to {subscriber} failed: {message}")]
    Delivery {
        subscriber: &'static str,
        message: String,
    },
}

impl OutboxError {
    pub fn delivery(subscriber: &'static str, message: impl Into<String>) -> Self {
        OutboxError::Delivery {
            subscriber,
            message: message.into(),
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OutboxError::EventStore(err) => err.is_transient(),
            OutboxError::Checkpoint(err) => {
                matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
            }
            OutboxError::Decode(_) | OutboxError::Http(_) => false,
            OutboxError::Delivery { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, OutboxError>;
