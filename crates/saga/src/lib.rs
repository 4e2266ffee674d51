//! Saga coordination for order fulfillment.
//!
//! The order fulfillment saga follows these steps:
//! 1. Create the order with catalog prices snapshotted into its lines
//! 2. Reserve inventory, then request payment from the provider
//! 3. Apply the provider's verdict: confirm stock and mark the order paid,
//!    or release stock and cancel the order
//!
//! Stock is confirmed or released before the order reaches its terminal
//! status, so after a crash the ledger and the payment record are enough for
//! the maintenance sweep to finish the order.

pub mod coordinator;
pub mod error;
pub mod maintenance;
pub mod order_fulfillment;
pub mod policy;
pub mod services;

pub use coordinator::{OrderItemRequest, SagaCoordinator};
pub use error::{Result, SagaError};
pub use maintenance::MaintenanceReport;
pub use policy::{DEFAULT_CURRENCY, DEFAULT_PAYMENT_WINDOW_SECS, SagaPolicy};
pub use services::{Catalog, CatalogEntry, CatalogError, InMemoryCatalog};
