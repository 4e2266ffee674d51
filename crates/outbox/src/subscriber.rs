//! Downstream consumers of order facts.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::AggregateId;
use event_store::EventId;
use tokio::sync::RwLock;

use crate::message::{IntegrationEvent, ORDER_CANCELED, ORDER_PAID};
use crate::{OutboxError, Result};

/// A consumer the relay delivers messages to.
///
/// Delivery is at-least-once; implementations must tolerate seeing the same
/// `event_id` again after a crash or a retried delivery.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Stable name; the relay keys its checkpoint on it.
    fn name(&self) -> &'static str;

    /// Whether this subscriber takes messages of `event_type`.
    fn wants(&self, event_type: &str) -> bool;

    async fn deliver(&self, event: &IntegrationEvent) -> Result<()>;
}

/// Writes each wanted message to the log and keeps nothing.
///
/// Stands in for a downstream service that has no URL configured.
#[derive(Debug, Clone)]
pub struct LogSubscriber {
    name: &'static str,
    event_types: &'static [&'static str],
}

impl LogSubscriber {
    pub fn shipping() -> Self {
        Self {
            name: "shipping",
            event_types: &[ORDER_PAID],
        }
    }

    pub fn notifications() -> Self {
        Self {
            name: "notifications",
            event_types: &[ORDER_PAID, ORDER_CANCELED],
        }
    }
}

#[async_trait]
impl Subscriber for LogSubscriber {
    fn name(&self) -> &'static str {
        self.name
    }

    fn wants(&self, event_type: &str) -> bool {
        self.event_types.contains(&event_type)
    }

    async fn deliver(&self, event: &IntegrationEvent) -> Result<()> {
        tracing::info!(
            subscriber = self.name,
            event_id = %event.event_id,
            order_id = %event.order_id,
            user_id = %event.user_id,
            message = %event.summary(),
            "dispatched"
        );
        Ok(())
    }
}

/// Failure injection shared by the in-memory subscribers.
#[derive(Debug, Default)]
struct FailNext(AtomicUsize);

impl FailNext {
    fn set(&self, count: usize) {
        self.0.store(count, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A shipment request accepted by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentRequest {
    pub order_id: AggregateId,
    pub event_id: EventId,
}

/// Recording shipping intake for tests: one shipment per paid order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingIntake {
    seen: Arc<RwLock<HashSet<EventId>>>,
    shipments: Arc<RwLock<Vec<ShipmentRequest>>>,
    failing: Arc<FailNext>,
}

impl InMemoryShippingIntake {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shipments(&self) -> Vec<ShipmentRequest> {
        self.shipments.read().await.clone()
    }

    /// The next `count` deliveries fail.
    pub fn fail_next(&self, count: usize) {
        self.failing.set(count);
    }
}

#[async_trait]
impl Subscriber for InMemoryShippingIntake {
    fn name(&self) -> &'static str {
        "shipping"
    }

    fn wants(&self, event_type: &str) -> bool {
        event_type == ORDER_PAID
    }

    async fn deliver(&self, event: &IntegrationEvent) -> Result<()> {
        if self.failing.take() {
            return Err(OutboxError::delivery(self.name(), "shipping intake unavailable"));
        }
        if !self.seen.write().await.insert(event.event_id) {
            tracing::debug!(order_id = %event.order_id, "shipment already queued");
            return Ok(());
        }
        self.shipments.write().await.push(ShipmentRequest {
            order_id: event.order_id,
            event_id: event.event_id,
        });
        tracing::info!(order_id = %event.order_id, "shipment queued");
        Ok(())
    }
}

/// A message sent to a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub order_id: AggregateId,
    pub event_type: &'static str,
    pub text: String,
}

/// Recording notifier for tests: keeps what it would have told the
/// customer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    seen: Arc<RwLock<HashSet<EventId>>>,
    sent: Arc<RwLock<Vec<Notification>>>,
    failing: Arc<FailNext>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub fn fail_next(&self, count: usize) {
        self.failing.set(count);
    }
}

#[async_trait]
impl Subscriber for InMemoryNotifier {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn wants(&self, event_type: &str) -> bool {
        event_type == ORDER_PAID || event_type == ORDER_CANCELED
    }

    async fn deliver(&self, event: &IntegrationEvent) -> Result<()> {
        if self.failing.take() {
            return Err(OutboxError::delivery(self.name(), "notification service unavailable"));
        }
        if !self.seen.write().await.insert(event.event_id) {
            return Ok(());
        }

        let text = event.summary();
        tracing::info!(order_id = %event.order_id, user_id = %event.user_id, "customer notified");
        self.sent.write().await.push(Notification {
            order_id: event.order_id,
            event_type: event.event_type,
            text,
        });
        Ok(())
    }
}
