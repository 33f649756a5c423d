//! Projection engine: routes stored events to every read model.
//!
//! Each stored event is decoded once into [`GovernanceEvent`] and then handed
//! to each projection's runner, in chronological `(occurred_at, event_id)`
//! order. All runners share one cursor, so they can never drift apart.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use polity_core::{EventId, StreamId};
use polity_events::{ProjectionCursor, ProjectionError, ProjectionRunner, SchemaError};

use crate::event_store::{EventStore, EventStoreError, StoredEvent};

use super::budgets::BudgetsProjection;
use super::decode::GovernanceEvent;
use super::delegations::DelegationsProjection;
use super::denials::DenialsProjection;
use super::health::SystemHealthProjection;
use super::mandates::MandatesProjection;

/// Page size used when replaying history from the store.
pub const REPLAY_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum ProjectionEngineError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("failed to decode stored event: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("failed to serialize projection state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct StateView<'a> {
    budgets: &'a BudgetsProjection,
    delegations: &'a DelegationsProjection,
    denials: &'a DenialsProjection,
    health: &'a SystemHealthProjection,
    mandates: &'a MandatesProjection,
}

#[derive(Debug)]
pub struct ProjectionEngine {
    budgets: ProjectionRunner<BudgetsProjection>,
    denials: ProjectionRunner<DenialsProjection>,
    delegations: ProjectionRunner<DelegationsProjection>,
    mandates: ProjectionRunner<MandatesProjection>,
    health: ProjectionRunner<SystemHealthProjection>,
    cursor: Option<ProjectionCursor>,
    seen: u64,
    /// Highest version routed per stream.
    positions: HashMap<StreamId, u64>,
}

impl Default for ProjectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionEngine {
    pub fn new() -> Self {
        Self {
            budgets: ProjectionRunner::new(BudgetsProjection::default()),
            denials: ProjectionRunner::new(DenialsProjection::default()),
            delegations: ProjectionRunner::new(DelegationsProjection::default()),
            mandates: ProjectionRunner::new(MandatesProjection::default()),
            health: ProjectionRunner::new(SystemHealthProjection::default()),
            cursor: None,
            seen: 0,
            positions: HashMap::new(),
        }
    }

    pub fn budgets(&self) -> &BudgetsProjection {
        self.budgets.projection()
    }

    pub fn denials(&self) -> &DenialsProjection {
        self.denials.projection()
    }

    pub fn delegations(&self) -> &DelegationsProjection {
        self.delegations.projection()
    }

    pub fn mandates(&self) -> &MandatesProjection {
        self.mandates.projection()
    }

    pub fn health(&self) -> &SystemHealthProjection {
        self.health.projection()
    }

    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Id of the last event routed, the resume point for [`Self::catch_up`].
    pub fn last_event_id(&self) -> Option<EventId> {
        self.cursor.map(|c| c.event_id())
    }

    /// Number of events routed since the last reset.
    pub fn events_seen(&self) -> u64 {
        self.seen
    }

    pub fn reset(&mut self) {
        self.budgets.reset();
        self.denials.reset();
        self.delegations.reset();
        self.mandates.reset();
        self.health.reset();
        self.cursor = None;
        self.seen = 0;
        self.positions.clear();
    }

    /// Highest version of `stream_id` the projections have seen (0 if none).
    pub fn stream_position(&self, stream_id: &StreamId) -> u64 {
        self.positions.get(stream_id).copied().unwrap_or(0)
    }

    /// Decode one stored event and route it to every interested projection.
    pub fn apply_stored(&mut self, stored: &StoredEvent) -> Result<(), ProjectionEngineError> {
        let found = stored.cursor();
        if let Some(last) = self.cursor {
            if found <= last {
                return Err(ProjectionError::NonMonotonicSequence { last, found }.into());
            }
        }

        let envelope = stored.decode::<GovernanceEvent>()?;
        self.budgets.apply(&envelope)?;
        self.denials.apply(&envelope)?;
        self.delegations.apply(&envelope)?;
        self.mandates.apply(&envelope)?;
        self.health.apply(&envelope)?;

        self.cursor = Some(found);
        self.seen += 1;
        let position = self.positions.entry(stored.stream_id.clone()).or_insert(0);
        *position = (*position).max(stored.version);
        Ok(())
    }

    /// Reset every projection and replay the full history.
    pub fn rebuild<S>(&mut self, store: &S) -> Result<u64, ProjectionEngineError>
    where
        S: EventStore + ?Sized,
    {
        self.reset();
        let replayed = self.catch_up(store)?;
        info!(events = replayed, "projections rebuilt");
        Ok(replayed)
    }

    /// Apply every event after the current cursor.
    pub fn catch_up<S>(&mut self, store: &S) -> Result<u64, ProjectionEngineError>
    where
        S: EventStore + ?Sized,
    {
        let mut applied = 0u64;
        loop {
            let page = store.load_all_events(self.last_event_id(), Some(REPLAY_PAGE_SIZE))?;
            for stored in &page {
                self.apply_stored(stored)?;
                applied += 1;
            }
            if page.len() < REPLAY_PAGE_SIZE {
                break;
            }
        }
        if applied > 0 {
            debug!(events = applied, "projections caught up");
        }
        Ok(applied)
    }

    /// Catch up until `stream_id` is seen at least up to `version`.
    ///
    /// Events committed with a timestamp before the cursor are invisible to
    /// [`Self::catch_up`]; when that leaves the stream short, rebuild.
    pub fn catch_up_through<S>(
        &mut self,
        store: &S,
        stream_id: &StreamId,
        version: u64,
    ) -> Result<u64, ProjectionEngineError>
    where
        S: EventStore + ?Sized,
    {
        let applied = self.catch_up(store)?;
        if self.stream_position(stream_id) >= version {
            return Ok(applied);
        }
        warn!(
            stream_id = %stream_id,
            seen = self.stream_position(stream_id),
            version,
            "stream ahead of projections after catch-up; rebuilding"
        );
        self.rebuild(store)
    }

    /// Live path: apply events an append just returned.
    ///
    /// A committed event that sorts at or before the cursor (a concurrent
    /// writer with an earlier timestamp) cannot be applied incrementally, so
    /// the engine falls back to a full rebuild.
    pub fn apply_committed<S>(&mut self, store: &S, events: &[StoredEvent]) -> Result<(), ProjectionEngineError>
    where
        S: EventStore + ?Sized,
    {
        for stored in events {
            let behind = self.cursor.is_some_and(|last| stored.cursor() <= last);
            if behind {
                warn!(
                    event_id = %stored.event_id,
                    event_type = %stored.event_type,
                    "committed event sorts before projection cursor; rebuilding"
                );
                self.rebuild(store)?;
                return Ok(());
            }
            self.apply_stored(stored)?;
        }
        Ok(())
    }

    /// Serialized state of every projection. Two engines that replayed the
    /// same history return identical strings.
    pub fn state_json(&self) -> Result<String, ProjectionEngineError> {
        let view = StateView {
            budgets: self.budgets(),
            delegations: self.delegations(),
            denials: self.denials(),
            health: self.health(),
            mandates: self.mandates(),
        };
        Ok(serde_json::to_string(&view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use polity_core::{ActorId, CommandId, MandateId};
    use polity_events::Event;
    use polity_mandates::{MandateChartered, MandateEvent, STREAM_TYPE, mandate_stream};

    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::projections::decode::governance_registry;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn charter(store: &InMemoryEventStore, at: DateTime<Utc>) -> Vec<StoredEvent> {
        let id = MandateId::new();
        let ev = MandateEvent::Chartered(MandateChartered {
            mandate_id: id,
            title: "Clerk".to_string(),
            holder: ActorId::new(),
            review_interval_days: 90,
            next_checkpoint_at: at + Duration::days(90),
            occurred_at: at,
        });
        let stream = mandate_stream(id);
        let uncommitted = UncommittedEvent::from_typed(&stream, STREAM_TYPE, CommandId::new(), None, &ev).unwrap();
        assert_eq!(uncommitted.event_type, ev.event_type());
        store.append(&stream, 0, vec![uncommitted]).unwrap()
    }

    #[test]
    fn catch_up_pages_through_history() {
        let store = InMemoryEventStore::new(governance_registry().unwrap());
        for i in 0..(REPLAY_PAGE_SIZE as i64 + 3) {
            charter(&store, t0() + Duration::seconds(i));
        }

        let mut engine = ProjectionEngine::new();
        assert_eq!(engine.catch_up(&store).unwrap(), REPLAY_PAGE_SIZE as u64 + 3);
        assert_eq!(engine.mandates().active_count(), REPLAY_PAGE_SIZE + 3);
        assert_eq!(engine.catch_up(&store).unwrap(), 0);
    }

    #[test]
    fn late_committed_event_triggers_rebuild() {
        let store = InMemoryEventStore::new(governance_registry().unwrap());
        let mut engine = ProjectionEngine::new();

        let later = charter(&store, t0() + Duration::hours(1));
        engine.apply_committed(&store, &later).unwrap();

        let earlier = charter(&store, t0());
        engine.apply_committed(&store, &earlier).unwrap();

        assert_eq!(engine.mandates().active_count(), 2);
        assert_eq!(engine.events_seen(), 2);
        assert_eq!(engine.cursor(), Some(later[0].cursor()));
    }

    #[test]
    fn catch_up_through_recovers_events_behind_the_cursor() {
        let store = InMemoryEventStore::new(governance_registry().unwrap());
        let mut engine = ProjectionEngine::new();
        let later = charter(&store, t0() + Duration::hours(1));
        engine.catch_up(&store).unwrap();

        // Committed after the cursor moved, but stamped before it.
        let earlier = charter(&store, t0());
        assert_eq!(engine.catch_up(&store).unwrap(), 0);
        assert_eq!(engine.stream_position(&earlier[0].stream_id), 0);

        engine.catch_up_through(&store, &earlier[0].stream_id, 1).unwrap();
        assert_eq!(engine.stream_position(&earlier[0].stream_id), 1);
        assert_eq!(engine.stream_position(&later[0].stream_id), 1);
        assert_eq!(engine.mandates().active_count(), 2);
    }

    #[test]
    fn duplicate_event_is_rejected() {
        let store = InMemoryEventStore::new(governance_registry().unwrap());
        let committed = charter(&store, t0());
        let mut engine = ProjectionEngine::new();
        engine.apply_stored(&committed[0]).unwrap();

        match engine.apply_stored(&committed[0]) {
            Err(ProjectionEngineError::Projection(ProjectionError::NonMonotonicSequence { .. })) => {}
            other => panic!("Expected NonMonotonicSequence, got {other:?}"),
        }
    }
}
