//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Stable name stored alongside the payload; downstream readers such
    /// as the outbox relay select on it.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// Aggregates are rebuilt by replaying their events. Command methods inspect
/// the current state and return the events to record; `apply` folds an event
/// into the state and never fails.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// `None` until the creating event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    /// Called by the command handler while replaying.
    fn set_version(&mut self, version: Version);

    /// Folds an event into the state. Must be deterministic.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
