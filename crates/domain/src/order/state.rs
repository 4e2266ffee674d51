//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// ```text
/// New ──► PendingPayment ──► Paid ──► Shipped ──► Delivered
///  │            │
///  │            ├──► PaymentFailed ──► Canceled
///  │            └──────────────────────► Canceled
///  └──────────────────────────────────► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    New,

    /// Stock is held and a payment has been requested from the provider.
    PendingPayment,

    Paid,

    /// Transient: always followed by `Canceled` in the same append.
    PaymentFailed,

    Shipped,

    Delivered,

    Canceled,
}

impl OrderStatus {
    pub fn can_request_payment(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    /// Payment outcomes are only accepted while awaiting one.
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::PendingPayment | OrderStatus::PaymentFailed
        )
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_deliver(&self) -> bool {
        matches!(self, OrderStatus::Shipped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::Delivered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::PendingPayment => "PendingPayment",
            OrderStatus::Paid => "Paid",
            OrderStatus::PaymentFailed => "PaymentFailed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
