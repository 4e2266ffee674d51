//! Outbox relay: follows the event log and hands terminal order facts to
//! subscribers.
//!
//! The event log is the outbox. An order's `OrderPaid` or `OrderCanceled`
//! is committed with the order itself, so nothing is lost between commit and
//! publish; the relay only has to remember, per subscriber, the last
//! sequence it delivered. A subscriber that keeps failing stays behind on
//! its own checkpoint and never holds up the others or the saga.

use std::sync::Arc;
use std::time::Duration;

use common::{RetryPolicy, retry_with_backoff};
use event_store::EventStore;
use serde::Serialize;
use tokio::sync::watch;

use crate::checkpoint::CheckpointStore;
use crate::message::IntegrationEvent;
use crate::subscriber::Subscriber;
use crate::{OutboxError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What one relay pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    /// Messages handed to subscribers.
    pub delivered: usize,
    /// Subscribers that stopped early because a delivery kept failing.
    pub stalled: Vec<&'static str>,
}

pub struct OutboxRelay<S: EventStore> {
    store: S,
    subscribers: Vec<Arc<dyn Subscriber>>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl<S: EventStore> OutboxRelay<S> {
    pub fn new(store: S, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            subscribers: Vec::new(),
            checkpoints,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn register(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers everything each subscriber has not seen yet.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RelayReport> {
        let mut report = RelayReport::default();
        for subscriber in &self.subscribers {
            match self.drain(subscriber.as_ref()).await? {
                Drained::Complete(delivered) => report.delivered += delivered,
                Drained::Stalled(delivered) => {
                    report.delivered += delivered;
                    report.stalled.push(subscriber.name());
                }
            }
        }
        Ok(report)
    }

    async fn drain(&self, subscriber: &dyn Subscriber) -> Result<Drained> {
        let name = subscriber.name();
        let mut position = self.checkpoints.load(name).await?;
        let mut delivered = 0;

        loop {
            let batch = self.store.read_from(position, self.batch_size).await?;
            if batch.is_empty() {
                return Ok(Drained::Complete(delivered));
            }

            for envelope in &batch {
                let message = match IntegrationEvent::from_envelope(envelope) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::error!(
                            subscriber = name,
                            sequence = envelope.sequence,
                            error = %err,
                            "skipping undecodable order event"
                        );
                        None
                    }
                };

                if let Some(message) = message.filter(|m| subscriber.wants(m.event_type)) {
                    if let Err(err) = self.deliver(subscriber, &message).await {
                        metrics::counter!(
                            "outbox_deliveries_total",
                            "subscriber" => name,
                            "outcome" => "failed"
                        )
                        .increment(1);
                        tracing::warn!(
                            subscriber = name,
                            order_id = %message.order_id,
                            event_type = message.event_type,
                            error = %err,
                            "delivery failed, will retry on the next pass"
                        );
                        self.checkpoints.save(name, position).await?;
                        return Ok(Drained::Stalled(delivered));
                    }
                    metrics::counter!(
                        "outbox_deliveries_total",
                        "subscriber" => name,
                        "outcome" => "delivered"
                    )
                    .increment(1);
                    delivered += 1;
                }
                position = envelope.sequence;
            }

            self.checkpoints.save(name, position).await?;
        }
    }

    async fn deliver(&self, subscriber: &dyn Subscriber, message: &IntegrationEvent) -> Result<()> {
        retry_with_backoff(&self.retry, OutboxError::is_transient, || async move {
            subscriber.deliver(message).await
        })
        .await
    }

    /// Polls the log every `poll` until `shutdown` turns true.
    pub async fn run(&self, poll: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(subscribers = self.subscribers.len(), "outbox relay started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "outbox relay pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("outbox relay stopped");
    }
}

enum Drained {
    Complete(usize),
    Stalled(usize),
}
