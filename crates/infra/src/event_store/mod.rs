//! Append-only event store boundary.
//!
//! The trait makes no storage assumptions; `InMemoryEventStore` serves tests
//! and development, `SqliteEventStore` is the durable embedded backend.

pub mod in_memory;
pub mod query;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::EventFilter;
pub use sqlite::SqliteEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use polity_core::{CommandId, EventId, StreamId};
use polity_events::EventBus;

/// Adapter that publishes committed events to an `EventBus` after a successful append.
///
/// This ensures the ordering invariant: **publish happens only after append succeeds**.
/// An idempotent replay publishes the prior events again (at-least-once).
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<StoredEvent>,
{
    fn append(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // 1) Append (durable step)
        let committed = self.store.append(stream_id, expected_version, events)?;

        // 2) Publish committed events
        for e in &committed {
            self.bus
                .publish(e.clone())
                .map_err(|err| EventStoreError::Publish(format!("{err:?}")))?;
        }

        Ok(committed)
    }

    fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(stream_id)
    }

    fn load_all_events(
        &self,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_all_events(after, limit)
    }

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.query_events(filter)
    }

    fn get_stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        self.store.get_stream_version(stream_id)
    }

    fn load_command(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_command(stream_id, command_id)
    }
}
