//! Notification and shipping dispatch through the event-log outbox.
//!
//! [`OutboxRelay`] reads `OrderPaid` and `OrderCanceled` from the event log
//! by global sequence, turns them into [`IntegrationEvent`]s and delivers
//! them to every registered [`Subscriber`] at least once.
//!
//! [`HttpSubscriber`] posts messages to a downstream service and
//! [`LogSubscriber`] only logs them; the in-memory subscribers record what
//! they receive for tests.

pub mod checkpoint;
pub mod error;
pub mod http;
pub mod message;
pub mod relay;
pub mod subscriber;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
pub use error::{OutboxError, Result};
pub use http::HttpSubscriber;
pub use message::{IntegrationEvent, ORDER_CANCELED, ORDER_PAID};
pub use relay::{DEFAULT_BATCH_SIZE, OutboxRelay, RelayReport};
pub use subscriber::{
    InMemoryNotifier, InMemoryShippingIntake, LogSubscriber, Notification, ShipmentRequest,
    Subscriber,
};
