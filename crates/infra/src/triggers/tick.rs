//! Tick engine: periodic health evaluation and reflex events.
//!
//! Each tick snapshots the active delegation edges and mandates, measures how
//! concentrated incoming delegations are, and writes a tick marker plus any
//! reflex events to the reserved `system.ticks` stream. The write follows the
//! same discipline as user commands: one batch keyed by the tick's derived
//! command id, appended at the `system.ticks` version the snapshot was taken
//! at. A tick that lost a race to another writer drops its reflexes (the next
//! tick re-evaluates from fresh state) and records only its marker.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use polity_analytics::{Assessment, ConcentrationLevel, Thresholds, assess, in_degree};
use polity_core::{ActorId, Clock, EventId, MandateId, TickId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::projections::{ProjectionEngine, ProjectionEngineError};

use super::events::{
    ConcentrationAlarm, EscalationRaised, ReviewTriggered, STREAM_TYPE, SystemEvent, TickRecorded, system_stream,
};

/// Attempts at recording the marker alone after the tick's batch went stale.
pub const MARKER_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionEngineError),

    #[error("projection state lock poisoned")]
    Poisoned,
}

/// One reflex event planned by a tick. `label` names it in logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflex {
    pub label: String,
    pub event: SystemEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick_id: TickId,
    pub gini: f64,
    pub max_in_degree: u64,
    pub level: ConcentrationLevel,
    /// Reflex events persisted (including ones already persisted by an
    /// earlier attempt of the same tick).
    pub emitted: u64,
    /// Reflex events dropped because the snapshot went stale before the
    /// append; the next tick re-evaluates them.
    pub failed: u64,
}

/// Decide which reflex events a tick emits.
///
/// At most one concentration alarm fires, halt taking precedence over warn. A
/// halt cascades into an escalation when `escalation` is configured. Each
/// overdue mandate yields one review trigger.
pub fn plan_reflexes(
    tick_id: TickId,
    now: DateTime<Utc>,
    assessment: &Assessment<ActorId>,
    thresholds: &Thresholds,
    escalation: Option<&str>,
    overdue: &[(MandateId, DateTime<Utc>)],
) -> Vec<Reflex> {
    let mut reflexes = Vec::new();

    if let Some(threshold) = thresholds.crossed(assessment.level) {
        let alarm = ConcentrationAlarm {
            tick_id,
            gini: assessment.gini,
            threshold,
            max_in_degree: assessment.max_in_degree,
            top_recipient: assessment.top_recipient,
            occurred_at: now,
        };
        match assessment.level {
            ConcentrationLevel::Halt => {
                reflexes.push(Reflex {
                    label: "halt".to_string(),
                    event: SystemEvent::ConcentrationHalt(alarm),
                });
                if let Some(code) = escalation {
                    reflexes.push(Reflex {
                        label: "escalation".to_string(),
                        event: SystemEvent::EscalationRaised(EscalationRaised {
                            tick_id,
                            code: code.to_string(),
                            gini: assessment.gini,
                            occurred_at: now,
                        }),
                    });
                }
            }
            ConcentrationLevel::Warning => reflexes.push(Reflex {
                label: "warning".to_string(),
                event: SystemEvent::ConcentrationWarning(alarm),
            }),
            ConcentrationLevel::Normal => {}
        }
    }

    for (mandate_id, checkpoint_at) in overdue {
        reflexes.push(Reflex {
            label: format!("review:{mandate_id}"),
            event: SystemEvent::ReviewTriggered(ReviewTriggered {
                tick_id,
                mandate_id: *mandate_id,
                checkpoint_at: *checkpoint_at,
                occurred_at: now,
            }),
        });
    }

    reflexes
}

struct Snapshot {
    /// `system.ticks` version the projections had seen when measured.
    system_version: u64,
    assessment: Assessment<ActorId>,
    active_edges: u64,
    active_mandates: u64,
    overdue: Vec<(MandateId, DateTime<Utc>)>,
}

impl Snapshot {
    fn marker(&self, tick_id: TickId, now: DateTime<Utc>) -> SystemEvent {
        SystemEvent::TickRecorded(TickRecorded {
            tick_id,
            gini: self.assessment.gini,
            max_in_degree: self.assessment.max_in_degree,
            active_edges: self.active_edges,
            active_mandates: self.active_mandates,
            overdue_mandates: self.overdue.len() as u64,
            occurred_at: now,
        })
    }
}

/// Result of one `system.ticks` append.
struct Appended {
    events: Vec<StoredEvent>,
    /// The tick id had already committed; `events` are the earlier ones.
    replayed: bool,
}

impl Appended {
    fn reflexes(&self) -> u64 {
        self.events
            .iter()
            .filter(|e| e.event_type != SystemEvent::TICK_RECORDED)
            .count() as u64
    }
}

pub struct TickEngine<S> {
    store: Arc<S>,
    projections: Arc<RwLock<ProjectionEngine>>,
    clock: Arc<dyn Clock>,
    thresholds: Thresholds,
    escalation: Option<String>,
}

impl<S> TickEngine<S>
where
    S: EventStore,
{
    pub fn new(
        store: Arc<S>,
        projections: Arc<RwLock<ProjectionEngine>>,
        clock: Arc<dyn Clock>,
        thresholds: Thresholds,
        escalation: Option<String>,
    ) -> Self {
        Self {
            store,
            projections,
            clock,
            thresholds,
            escalation,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run one tick. Re-running the same `tick_id` is safe.
    #[instrument(skip(self), fields(tick_id = %tick_id))]
    pub fn run_tick(&self, tick_id: TickId) -> Result<TickReport, TickError> {
        let now = self.clock.now();
        let snapshot = self.snapshot(now)?;
        let reflexes = plan_reflexes(
            tick_id,
            now,
            &snapshot.assessment,
            &self.thresholds,
            self.escalation.as_deref(),
            &snapshot.overdue,
        );

        let mut batch = Vec::with_capacity(reflexes.len() + 1);
        batch.push(snapshot.marker(tick_id, now));
        batch.extend(reflexes.iter().map(|r| r.event.clone()));

        let (appended, failed) = match self.append_system(tick_id, snapshot.system_version, &batch) {
            Ok(appended) => (appended, 0),
            Err(err) if err.is_retryable() => {
                for reflex in &reflexes {
                    warn!(label = %reflex.label, error = %err, "stale tick snapshot; reflex event dropped");
                }
                (self.record_marker(tick_id)?, reflexes.len() as u64)
            }
            Err(err) => return Err(err.into()),
        };

        if !appended.replayed {
            let mut engine = self.projections.write().map_err(|_| TickError::Poisoned)?;
            engine.apply_committed(self.store.as_ref(), &appended.events)?;
        }

        let report = TickReport {
            tick_id,
            gini: snapshot.assessment.gini,
            max_in_degree: snapshot.assessment.max_in_degree,
            level: snapshot.assessment.level,
            emitted: appended.reflexes(),
            failed,
        };
        info!(
            gini = report.gini,
            level = ?report.level,
            emitted = report.emitted,
            failed = report.failed,
            replayed = appended.replayed,
            "tick completed"
        );
        Ok(report)
    }

    /// Record only the marker, measured again from fresh state.
    fn record_marker(&self, tick_id: TickId) -> Result<Appended, TickError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now();
            let snapshot = self.snapshot(now)?;
            match self.append_system(tick_id, snapshot.system_version, &[snapshot.marker(tick_id, now)]) {
                Ok(appended) => return Ok(appended),
                Err(err) if err.is_retryable() && attempt < MARKER_ATTEMPTS => {
                    warn!(attempt, error = %err, "tick marker conflicted; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, TickError> {
        let stream = system_stream();
        let mut engine = self.projections.write().map_err(|_| TickError::Poisoned)?;
        // Read the version first: whatever catch-up adds beyond it makes the
        // later append conflict instead of slipping past.
        let system_version = self.store.get_stream_version(&stream)?;
        engine.catch_up_through(self.store.as_ref(), &stream, system_version)?;

        let edges = engine.delegations().active_edges(now);
        let degrees = in_degree(edges.iter().copied());
        let mandates = engine.mandates();
        Ok(Snapshot {
            system_version,
            assessment: assess(&degrees, &self.thresholds),
            active_edges: edges.len() as u64,
            active_mandates: mandates.active_count() as u64,
            overdue: mandates
                .overdue(now)
                .into_iter()
                .map(|m| (m.mandate_id, m.next_checkpoint_at))
                .collect(),
        })
    }

    /// Append `events` as one batch keyed by the tick, at `expected`.
    fn append_system(
        &self,
        tick_id: TickId,
        expected: u64,
        events: &[SystemEvent],
    ) -> Result<Appended, EventStoreError> {
        let stream = system_stream();
        let command_id = tick_id.command_id();
        let uncommitted = events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(&stream, STREAM_TYPE, command_id, None, ev))
            .collect::<Result<Vec<_>, _>>()?;
        let submitted: Vec<EventId> = uncommitted.iter().map(|e| e.event_id).collect();

        let committed = self.store.append(&stream, expected, uncommitted)?;
        let replayed = committed.iter().map(|e| e.event_id).ne(submitted.iter().copied());
        Ok(Appended {
            events: committed,
            replayed,
        })
    }
}
