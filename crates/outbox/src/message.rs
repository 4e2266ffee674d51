//! Integration messages published to downstream consumers.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Order, OrderEvent, UserId};
use event_store::{EventEnvelope, EventId};
use serde::Serialize;

use crate::Result;

pub const ORDER_PAID: &str = "order.paid";
pub const ORDER_CANCELED: &str = "order.canceled";

/// A terminal order fact, as seen by consumers outside the saga.
///
/// `event_id` is the id of the stored event it was derived from, so a
/// consumer that sees the same message twice can recognize it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationEvent {
    pub event_id: EventId,
    /// Position in the global event log.
    pub sequence: i64,
    pub event_type: &'static str,
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl IntegrationEvent {
    /// Maps a stored event to the message it publishes, if any.
    ///
    /// Only `OrderPaid` and `OrderCanceled` leave the saga; everything else
    /// is internal bookkeeping.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Option<Self>> {
        if envelope.aggregate_type != Order::aggregate_type() {
            return Ok(None);
        }
        if envelope.event_type != OrderEvent::PAID && envelope.event_type != OrderEvent::CANCELED {
            return Ok(None);
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload.clone())?;
        let (event_type, user_id, payload) = match event {
            OrderEvent::OrderPaid(data) => (
                ORDER_PAID,
                data.user_id,
                serde_json::json!({
                    "payment_id": data.payment_id,
                    "amount": data.grand_total,
                    "paid_at": data.paid_at,
                }),
            ),
            OrderEvent::OrderCanceled(data) => (
                ORDER_CANCELED,
                data.user_id,
                serde_json::json!({
                    "reason": data.reason,
                    "canceled_at": data.canceled_at,
                }),
            ),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            event_id: envelope.event_id,
            sequence: envelope.sequence,
            event_type,
            order_id: envelope.aggregate_id,
            user_id,
            payload,
            occurred_at: envelope.timestamp,
        }))
    }

    /// One line telling the customer what happened to the order.
    pub fn summary(&self) -> String {
        match self.event_type {
            ORDER_PAID => format!("Order {} is paid and will ship soon", self.order_id),
            _ => {
                let reason = self.payload["reason"].as_str().unwrap_or("unknown");
                format!("Order {} was canceled ({reason})", self.order_id)
            }
        }
    }
}
