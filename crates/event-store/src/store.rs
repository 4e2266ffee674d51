use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected current version of the aggregate. `None` skips the check
    /// but the per-aggregate version uniqueness still holds.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The aggregate must not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Append-only event log.
///
/// Every stored event gets a per-aggregate [`Version`] and a position in the
/// global log (`EventEnvelope::sequence`). Readers that follow the whole log,
/// such as the outbox relay, page through it with [`EventStore::read_from`].
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate atomically.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version` does
    /// not match, or when another writer already stored one of the versions.
    /// Returns the aggregate's version after the append.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events of one aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Current version of an aggregate, `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Up to `limit` events with `sequence > after`, in sequence order.
    async fn read_from(&self, after: i64, limit: usize) -> Result<Vec<EventEnvelope>>;

    /// Highest assigned sequence, `0` for an empty log.
    async fn latest_sequence(&self) -> Result<i64>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Lets a backend chosen at startup be shared as `Arc<dyn EventStore>`.
#[async_trait]
impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        (**self).append(events, options).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }

    async fn read_from(&self, after: i64, limit: usize) -> Result<Vec<EventEnvelope>> {
        (**self).read_from(after, limit).await
    }

    async fn latest_sequence(&self) -> Result<i64> {
        (**self).latest_sequence().await
    }
}

/// Checks that a batch targets one aggregate with consecutive versions.
pub(crate) fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}
