use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    /// Global log; `events[i].sequence == i + 1`.
    events: Vec<EventEnvelope>,
    /// Indexes into `events` per aggregate, in version order.
    by_aggregate: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.by_aggregate
            .get(&aggregate_id)
            .and_then(|idx| idx.last())
            .map(|&i| self.events[i].version)
            .unwrap_or_else(Version::initial)
    }
}

/// In-memory event store used for local runs and tests.
///
/// Shares the semantics of [`crate::PostgresEventStore`]: one write lock
/// covers the version check and the append, so the check-then-write is atomic.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_version = events[0].version;

        let mut log = self.log.write().await;
        let current = log.version_of(aggregate_id);

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Same rule as the unique (aggregate_id, version) constraint.
        if first_version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let mut last_version = current;
        for mut event in events {
            let index = log.events.len();
            event.sequence = index as i64 + 1;
            last_version = event.version;
            log.events.push(event);
            log.by_aggregate.entry(aggregate_id).or_default().push(index);
        }

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .by_aggregate
            .get(&aggregate_id)
            .map(|idx| idx.iter().map(|&i| log.events[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .by_aggregate
            .contains_key(&aggregate_id)
            .then(|| log.version_of(aggregate_id)))
    }

    async fn read_from(&self, after: i64, limit: usize) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let start = after.max(0) as usize;
        Ok(log.events.iter().skip(start).take(limit).cloned().collect())
    }

    async fn latest_sequence(&self) -> Result<i64> {
        Ok(self.log.read().await.events.len() as i64)
    }
}
