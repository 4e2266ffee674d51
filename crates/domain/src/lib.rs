//! Domain layer for the storefront fulfillment system.
//!
//! - [`Aggregate`] / [`DomainEvent`] and the version-guarded [`CommandHandler`]
//! - the [`Order`] aggregate and its status state machine
//! - the [`Payment`] aggregate and its status state machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod money;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use money::Money;
pub use order::{
    CancelOrder, CancelReason, FailPayment, MarkDelivered, MarkPaid, MarkShipped, Order,
    OrderError, OrderEvent, OrderLine, OrderService, OrderStatus, PlaceOrder, RequestPayment,
    UserId,
};
pub use payment::{Payment, PaymentEvent, PaymentStateError, PaymentStatus, payment_id_for};
