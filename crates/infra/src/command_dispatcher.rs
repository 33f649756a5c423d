//! Command execution pipeline (application-level orchestration).
//!
//! ## Command Execution Flow
//!
//! ```text
//! Command + CommandId
//!   ↓
//! 1. Idempotency: was this command already committed on its stream?
//!      yes → return the events committed then (no decision is re-run)
//!   ↓
//! 2. Load the stream and check it is gap-free
//!   ↓
//! 3. Rehydrate the aggregate (typed decode of every stored event)
//!   ↓
//! 4. Handle the command (pure; gates run here against one snapshot)
//!   ↓
//! 5. Append with expected_version = loaded version
//! ```
//!
//! A `VersionConflict` from step 5 surfaces as [`DispatchError::Concurrency`].
//! The caller re-runs the whole command from step 1; nothing is merged.
//!
//! This module contains no IO itself; it composes the `EventStore` trait.

use thiserror::Error;
use tracing::{debug, info};

use polity_core::{Aggregate, CommandContext, CommandId, DomainError, EventId, GateViolation, StreamId};
use polity_events::{Command, DecodeEvent, Event, SchemaError};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::projections::ProjectionEngineError;

/// Failure of a dispatched command.
///
/// - **Concurrency**: retryable after reload (see [`DispatchError::is_retryable`]),
///   as is a `Store` error carrying `OutOfOrder`
/// - **Rejected** / **Validation** / **Conflict**: deterministic, retrying the
///   same input fails the same way
/// - **NotFound**: the command referenced an unknown entity
/// - **Decode** / **Store**: structural or storage failure, surfaced as-is
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("version conflict on stream '{stream_id}': expected {expected}, actual {actual}")]
    Concurrency {
        stream_id: StreamId,
        expected: u64,
        actual: u64,
    },

    #[error("rejected by gate '{}' ({}): {}", .0.gate, .0.reason_code, .0.message)]
    Rejected(GateViolation),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed to decode stream history: {0}")]
    Decode(#[from] SchemaError),

    #[error(transparent)]
    Store(EventStoreError),

    #[error("committed, but projections failed to update: {0}")]
    Projection(#[from] ProjectionEngineError),

    #[error("projection state lock poisoned")]
    Poisoned,
}

impl DispatchError {
    /// Version conflicts and out-of-order timestamps both clear on a fresh
    /// reload; everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Concurrency { .. } => true,
            DispatchError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn violation(&self) -> Option<&GateViolation> {
        match self {
            DispatchError::Rejected(v) => Some(v),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::VersionConflict {
                stream_id,
                expected,
                actual,
            } => DispatchError::Concurrency {
                stream_id,
                expected,
                actual,
            },
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::Rejected(violation) => DispatchError::Rejected(violation),
            DomainError::NotFound(msg) => DispatchError::NotFound(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Canonical committed events (with versions).
    pub events: Vec<StoredEvent>,
    /// True when the command id had already been committed and `events` are
    /// the ones recorded then.
    pub replayed: bool,
}

impl DispatchOutcome {
    pub fn stream_version(&self) -> Option<u64> {
        self.events.last().map(|e| e.version)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store so tests run against `InMemoryEventStore` and
/// deployments against `SqliteEventStore` with no change to domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Run `command` against the aggregate produced by `make_aggregate`.
    ///
    /// `stream_type` is recorded on every appended event; `command_id` is the
    /// idempotency key of the whole batch.
    pub fn dispatch<A>(
        &self,
        command: &A::Command,
        ctx: &CommandContext<'_>,
        command_id: CommandId,
        stream_type: &str,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + DecodeEvent,
    {
        let stream_id = command.target_stream();

        // 1) Idempotency before anything else
        let prior = self.store.load_command(&stream_id, command_id)?;
        if !prior.is_empty() {
            debug!(
                stream_id = %stream_id,
                command_id = %command_id,
                command_type = command.command_type(),
                "command already committed; returning prior events"
            );
            return Ok(DispatchOutcome {
                events: prior,
                replayed: true,
            });
        }

        // 2) Load history
        let history = self.store.load_stream(&stream_id)?;
        validate_loaded_stream(&stream_id, &history)?;
        let expected = history.last().map(|e| e.version).unwrap_or(0);

        // 3) Rehydrate
        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;

        // 4) Decide (no mutation)
        let decided = aggregate.handle(command, ctx)?;
        if decided.is_empty() {
            return Ok(DispatchOutcome {
                events: vec![],
                replayed: false,
            });
        }

        // 5) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(&stream_id, stream_type, command_id, ctx.actor, ev))
            .collect::<Result<Vec<_>, _>>()?;
        let submitted: Vec<EventId> = uncommitted.iter().map(|e| e.event_id).collect();

        let committed = self.store.append(&stream_id, expected, uncommitted)?;

        // A racing twin with the same command id may have won between the
        // idempotency check and the append; the store then hands back its events.
        let replayed = committed.iter().map(|e| e.event_id).ne(submitted.iter().copied());
        if replayed {
            debug!(stream_id = %stream_id, command_id = %command_id, "concurrent duplicate resolved to winner");
        } else {
            info!(
                stream_id = %stream_id,
                command_type = command.command_type(),
                events = committed.len(),
                version = expected + committed.len() as u64,
                "command committed"
            );
        }

        Ok(DispatchOutcome {
            events: committed,
            replayed,
        })
    }
}

fn validate_loaded_stream(stream_id: &StreamId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // Versions start at 1 and have no gaps; anything else is a store defect.
    for (idx, e) in stream.iter().enumerate() {
        if &e.stream_id != stream_id {
            return Err(DispatchError::Store(EventStoreError::Storage(format!(
                "loaded stream '{stream_id}' contains event of stream '{}' at index {idx}",
                e.stream_id
            ))));
        }
        let expected = idx as u64 + 1;
        if e.version != expected {
            return Err(DispatchError::Store(EventStoreError::Storage(format!(
                "loaded stream '{stream_id}' has version {} at index {idx} (expected {expected})",
                e.version
            ))));
        }
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DecodeEvent,
{
    for stored in history {
        let ev = A::Event::decode(&stored.event_type, stored.schema_version, &stored.payload)?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use polity_core::{ActorId, MandateId, Unrestricted};
    use polity_mandates::{CharterMandate, CompleteReview, Mandate, MandateCommand, STREAM_TYPE};

    use crate::event_store::InMemoryEventStore;
    use crate::projections::governance_registry;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn charter(id: MandateId) -> MandateCommand {
        MandateCommand::Charter(CharterMandate {
            mandate_id: id,
            title: "Auditor".to_string(),
            holder: ActorId::new(),
            review_interval_days: 30,
        })
    }

    #[test]
    fn same_command_id_replays_prior_events() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(governance_registry().unwrap()));
        let id = MandateId::new();
        let cmd = charter(id);
        let ctx = CommandContext::new(t0(), None, &Unrestricted);
        let command_id = CommandId::new();

        let first = dispatcher
            .dispatch(&cmd, &ctx, command_id, STREAM_TYPE, || Mandate::empty(id))
            .unwrap();
        assert!(!first.replayed);
        assert_eq!(first.stream_version(), Some(1));

        let second = dispatcher
            .dispatch(&cmd, &ctx, command_id, STREAM_TYPE, || Mandate::empty(id))
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.events, first.events);

        // A fresh command id re-runs the decision, which now conflicts.
        let err = dispatcher
            .dispatch(&cmd, &ctx, CommandId::new(), STREAM_TYPE, || Mandate::empty(id))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_stream_maps_to_not_found() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(governance_registry().unwrap()));
        let id = MandateId::new();
        let cmd = MandateCommand::CompleteReview(CompleteReview { mandate_id: id });
        let ctx = CommandContext::new(t0(), None, &Unrestricted);

        match dispatcher.dispatch(&cmd, &ctx, CommandId::new(), STREAM_TYPE, || Mandate::empty(id)) {
            Err(DispatchError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
        assert_eq!(
            dispatcher.store().get_stream_version(&cmd.target_stream()).unwrap(),
            0
        );
    }

    #[test]
    fn version_conflict_is_retryable() {
        let err = DispatchError::from(EventStoreError::VersionConflict {
            stream_id: StreamId::new("s"),
            expected: 1,
            actual: 2,
        });
        assert!(err.is_retryable());
        assert!(!DispatchError::from(EventStoreError::Storage("disk".to_string())).is_retryable());
        assert!(
            DispatchError::from(EventStoreError::OutOfOrder {
                stream_id: StreamId::new("s"),
                head: t0(),
                attempted: t0() - chrono::Duration::seconds(1),
            })
            .is_retryable()
        );
    }
}
