use chrono::Duration;
use common::RetryPolicy;

/// Default time a customer has to complete payment, in seconds.
pub const DEFAULT_PAYMENT_WINDOW_SECS: i64 = 15 * 60;

pub const DEFAULT_CURRENCY: &str = "RUB";

/// Knobs of the fulfillment saga.
#[derive(Debug, Clone)]
pub struct SagaPolicy {
    /// An order still awaiting payment this long after the request is
    /// timed out by the sweep.
    pub payment_window: Duration,
    /// An order still `New` this long after it was placed never got its
    /// stock reserved and is canceled by the sweep.
    pub stale_order_after: Duration,
    pub currency: String,
    /// Backoff for transient collaborator failures.
    pub retry: RetryPolicy,
}

impl Default for SagaPolicy {
    fn default() -> Self {
        Self {
            payment_window: Duration::seconds(DEFAULT_PAYMENT_WINDOW_SECS),
            stale_order_after: Duration::seconds(DEFAULT_PAYMENT_WINDOW_SECS),
            currency: DEFAULT_CURRENCY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SagaPolicy {
    pub fn with_payment_window(mut self, window: Duration) -> Self {
        self.payment_window = window;
        self
    }

    pub fn with_stale_order_after(mut self, after: Duration) -> Self {
        self.stale_order_after = after;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
