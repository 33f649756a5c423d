use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use polity_core::{ActorId, CommandId, EventId, StreamId};
use polity_events::{DecodeEvent, Event, EventEnvelope, ProjectionCursor, Routable, SchemaError, SchemaRegistry};
use std::collections::HashSet;
use std::sync::Arc;

use super::query::EventFilter;

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: produced by an aggregate's `handle()`
/// 2. **UncommittedEvent**: payload encoded to JSON, wrapped with stream metadata
/// 3. **StoredEvent**: persisted with its per-stream `version`
/// 4. **EventEnvelope**: decoded back into a typed payload for projections
///
/// Every event of one append shares the same `stream_id`, `stream_type` and
/// `command_id`; the command id is the idempotency key of the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub stream_type: String,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<ActorId>,
    pub command_id: CommandId,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Encode a typed domain event for the given stream.
    pub fn from_typed<E>(
        stream_id: &StreamId,
        stream_type: impl Into<String>,
        command_id: CommandId,
        actor_id: Option<ActorId>,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: Event + DecodeEvent,
    {
        Ok(Self {
            event_id: EventId::new(),
            stream_id: stream_id.clone(),
            stream_type: stream_type.into(),
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            occurred_at: event.occurred_at(),
            actor_id,
            command_id,
            payload: event.encode()?,
        })
    }

    pub(crate) fn commit(self, version: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            stream_id: self.stream_id,
            stream_type: self.stream_type,
            version,
            event_type: self.event_type,
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            actor_id: self.actor_id,
            command_id: self.command_id,
            payload: self.payload,
        }
    }
}

/// A committed event.
///
/// `version` is the position in its stream: it starts at 1, increases by one
/// per event, and `(stream_id, version)` is unique across the store. Stored
/// events are never modified or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub stream_type: String,

    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<ActorId>,
    pub command_id: CommandId,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Position in the cross-stream chronological order.
    pub fn cursor(&self) -> ProjectionCursor {
        ProjectionCursor::new(self.occurred_at, self.event_id)
    }

    /// Untyped envelope (raw JSON payload).
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        self.envelope_with(self.payload.clone())
    }

    /// Decode the payload into the concrete event family `E`.
    pub fn decode<E: DecodeEvent>(&self) -> Result<EventEnvelope<E>, SchemaError> {
        let payload = E::decode(&self.event_type, self.schema_version, &self.payload)?;
        Ok(self.envelope_with(payload))
    }

    fn envelope_with<E>(&self, payload: E) -> EventEnvelope<E> {
        EventEnvelope::new(
            self.event_id,
            self.stream_id.clone(),
            self.stream_type.clone(),
            self.event_type.clone(),
            self.version,
            self.occurred_at,
            self.actor_id,
            self.command_id,
            payload,
        )
    }
}

impl Routable for StoredEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Event store operation error.
///
/// ## Error Categories
///
/// - **VersionConflict**: optimistic concurrency check failed; reload and retry
/// - **OutOfOrder**: the batch is timestamped before the stream head; retry with
///   a fresh clock reading
/// - **InvalidAppend** / **Schema**: the batch itself is malformed
/// - **UnknownCursor**: `load_all_events` was given an event id the store never saw
/// - **Storage**: the backend failed; surfaced unmodified, never retried here
/// - **Publish**: committed, but publication to the bus failed
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("version conflict on stream '{stream_id}': expected {expected}, actual {actual}")]
    VersionConflict {
        stream_id: StreamId,
        expected: u64,
        actual: u64,
    },

    #[error("out of order append on stream '{stream_id}': head at {head}, batch at {attempted}")]
    OutOfOrder {
        stream_id: StreamId,
        head: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("unknown cursor: event {0} is not in the store")]
    UnknownCursor(EventId),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

impl EventStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::VersionConflict { .. } | EventStoreError::OutOfOrder { .. }
        )
    }
}

/// Append-only event store.
///
/// ## Append Semantics
///
/// `append()`:
/// - returns `Ok(vec![])` for an empty batch
/// - validates the batch (single stream, single stream type, single command id,
///   registered schema, stream type matching the existing stream)
/// - if `(stream_id, command_id)` was already committed, returns the events
///   committed then, unchanged; this check comes **before** the version check
/// - fails with `VersionConflict` when the stream version is not `expected_version`
/// - fails with `OutOfOrder` when the batch's first `occurred_at` is earlier than
///   the stream head's, so chronological replay never reorders a stream
/// - assigns versions `current + 1 ..` and commits the whole batch atomically
///
/// ## Read Semantics
///
/// - `load_stream()` is ordered by version; an unknown stream is empty
/// - `load_all_events()` and `query_events()` are ordered by
///   `(occurred_at, event_id)`
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Chronological history strictly after `after` (or from the start).
    fn load_all_events(
        &self,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// 0 if the stream has no events.
    fn get_stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError>;

    /// Events committed by `command_id` on `stream_id` (empty if none).
    fn load_command(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(stream_id, expected_version, events)
    }

    fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(stream_id)
    }

    fn load_all_events(
        &self,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all_events(after, limit)
    }

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).query_events(filter)
    }

    fn get_stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        (**self).get_stream_version(stream_id)
    }

    fn load_command(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_command(stream_id, command_id)
    }
}

/// Shape of a validated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BatchHeader {
    pub stream_type: String,
    pub command_id: CommandId,
}

/// Structural checks shared by every backend. Assumes a non-empty batch.
pub(crate) fn validate_batch(
    stream_id: &StreamId,
    events: &[UncommittedEvent],
    registry: &SchemaRegistry,
) -> Result<BatchHeader, EventStoreError> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;
    let header = BatchHeader {
        stream_type: first.stream_type.clone(),
        command_id: first.command_id,
    };

    let mut previous = first.occurred_at;
    let mut ids = HashSet::with_capacity(events.len());
    for (idx, e) in events.iter().enumerate() {
        if e.occurred_at < previous {
            return Err(EventStoreError::InvalidAppend(format!(
                "event at index {idx} is timestamped before its predecessor"
            )));
        }
        previous = e.occurred_at;
        if !ids.insert(e.event_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "event id {} appears twice in the batch",
                e.event_id
            )));
        }
        if &e.stream_id != stream_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "event at index {idx} targets stream '{}', append targets '{stream_id}'",
                e.stream_id
            )));
        }
        if e.stream_type != header.stream_type {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple stream types (index {idx})"
            )));
        }
        if e.command_id != header.command_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple command ids (index {idx})"
            )));
        }
        registry.check(&e.event_type, e.schema_version)?;
    }

    Ok(header)
}

/// A batch may not start before the last event already in its stream.
pub(crate) fn check_chronology(
    stream_id: &StreamId,
    head: Option<DateTime<Utc>>,
    events: &[UncommittedEvent],
) -> Result<(), EventStoreError> {
    match (head, events.first()) {
        (Some(head), Some(first)) if first.occurred_at < head => Err(EventStoreError::OutOfOrder {
            stream_id: stream_id.clone(),
            head,
            attempted: first.occurred_at,
        }),
        _ => Ok(()),
    }
}
