use crate::{Event, EventEnvelope};

/// A projection builds a read model from the append-only event log.
///
/// Read models are **disposable**: they can be reset and rebuilt from events at
/// any time, and a rebuild from the same history must produce identical state.
/// That makes two requirements on implementations:
///
/// - `apply` is a total, pure function of (current state, event). It never
///   panics for a well-formed event whose type it declares interest in, and it
///   leaves state untouched for any other type.
/// - State must not depend on anything but the events: no clocks, no random
///   ids, no hash-order iteration in serialized output.
///
/// Persistence of the read model is outside this crate.
pub trait Projection {
    type Ev: Event;

    /// Stable projection name (used in logs and state dumps).
    fn name(&self) -> &'static str;

    /// Whether this projection consumes `event_type`.
    fn interested_in(&self, event_type: &str) -> bool;

    /// Apply a single event to the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);

    /// Drop all state (first step of a rebuild).
    fn reset(&mut self);
}
