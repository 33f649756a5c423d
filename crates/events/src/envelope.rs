use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polity_core::{ActorId, CommandId, EventId, StreamId};

/// Envelope for an event, containing stream metadata.
///
/// This is the typed view projections receive: `payload` has already been
/// decoded from its stored JSON form.
///
/// - `version` is the per-stream position (from 1, no gaps).
/// - `(occurred_at, event_id)` is the cross-stream replay order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    stream_id: StreamId,
    stream_type: String,
    event_type: String,
    version: u64,
    occurred_at: DateTime<Utc>,
    actor_id: Option<ActorId>,
    command_id: CommandId,
    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        stream_id: StreamId,
        stream_type: impl Into<String>,
        event_type: impl Into<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
        actor_id: Option<ActorId>,
        command_id: CommandId,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            event_type: event_type.into(),
            version,
            occurred_at,
            actor_id,
            command_id,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn actor_id(&self) -> Option<ActorId> {
        self.actor_id
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Same metadata, different payload.
    pub fn map<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            stream_id: self.stream_id,
            stream_type: self.stream_type,
            event_type: self.event_type,
            version: self.version,
            occurred_at: self.occurred_at,
            actor_id: self.actor_id,
            command_id: self.command_id,
            payload: f(self.payload),
        }
    }
}
