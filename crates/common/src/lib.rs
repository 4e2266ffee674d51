//! Shared building blocks used by every crate in the workspace.

pub mod clock;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_with_backoff};
pub use types::{AggregateId, ProductId};
