//! System health read model built from tick-engine reflex events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use polity_analytics::ConcentrationLevel;
use polity_core::{ActorId, TickId};
use polity_events::{DecodeEvent, EventEnvelope, Projection};

use super::decode::GovernanceEvent;
use crate::triggers::events::SystemEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick_id: TickId,
    pub gini: f64,
    pub max_in_degree: u64,
    pub active_edges: u64,
    pub active_mandates: u64,
    pub overdue_mandates: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmSummary {
    pub tick_id: TickId,
    pub level: ConcentrationLevel,
    pub gini: f64,
    pub threshold: f64,
    pub top_recipient: Option<ActorId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemHealthProjection {
    pub last_tick: Option<TickSummary>,
    pub last_alarm: Option<AlarmSummary>,
    pub ticks: u64,
    pub warnings: u64,
    pub halts: u64,
    pub escalations: u64,
    pub reviews_triggered: u64,
}

impl Projection for SystemHealthProjection {
    type Ev = GovernanceEvent;

    fn name(&self) -> &'static str {
        "system_health"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        SystemEvent::owns(event_type)
    }

    fn apply(&mut self, envelope: &EventEnvelope<GovernanceEvent>) {
        let GovernanceEvent::System(event) = envelope.payload() else {
            return;
        };
        match event {
            SystemEvent::TickRecorded(e) => {
                self.ticks += 1;
                self.last_tick = Some(TickSummary {
                    tick_id: e.tick_id,
                    gini: e.gini,
                    max_in_degree: e.max_in_degree,
                    active_edges: e.active_edges,
                    active_mandates: e.active_mandates,
                    overdue_mandates: e.overdue_mandates,
                    at: e.occurred_at,
                });
            }
            SystemEvent::ConcentrationWarning(e) => {
                self.warnings += 1;
                self.last_alarm = Some(AlarmSummary {
                    tick_id: e.tick_id,
                    level: ConcentrationLevel::Warning,
                    gini: e.gini,
                    threshold: e.threshold,
                    top_recipient: e.top_recipient,
                    at: e.occurred_at,
                });
            }
            SystemEvent::ConcentrationHalt(e) => {
                self.halts += 1;
                self.last_alarm = Some(AlarmSummary {
                    tick_id: e.tick_id,
                    level: ConcentrationLevel::Halt,
                    gini: e.gini,
                    threshold: e.threshold,
                    top_recipient: e.top_recipient,
                    at: e.occurred_at,
                });
            }
            SystemEvent::EscalationRaised(_) => self.escalations += 1,
            SystemEvent::ReviewTriggered(_) => self.reviews_triggered += 1,
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
