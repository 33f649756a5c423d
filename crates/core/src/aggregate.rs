//! Aggregate root trait for event-sourced domain models.

use chrono::{DateTime, Utc};

use crate::authority::Authority;
use crate::id::ActorId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of events applied; equals the stream version after rehydration.
    fn version(&self) -> u64;
}

/// Everything a command handler may consult besides aggregate state.
///
/// Time and authority arrive here instead of being looked up globally, so
/// `handle` stays a pure function of its inputs.
#[derive(Clone, Copy)]
pub struct CommandContext<'a> {
    pub now: DateTime<Utc>,
    pub actor: Option<ActorId>,
    pub authority: &'a dyn Authority,
}

impl<'a> CommandContext<'a> {
    pub fn new(now: DateTime<Utc>, actor: Option<ActorId>, authority: &'a dyn Authority) -> Self {
        Self {
            now,
            actor,
            authority,
        }
    }
}

impl core::fmt::Debug for CommandContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandContext")
            .field("now", &self.now)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd, ctx)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(
        &self,
        command: &Self::Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<Self::Event>, Self::Error>;
}
