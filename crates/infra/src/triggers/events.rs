//! Reflex events written by the tick engine to the reserved system stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use polity_core::{ActorId, MandateId, StreamId, TickId};
use polity_events::{DecodeEvent, Event, SchemaError, decode_payload, encode_payload};

pub const STREAM_TYPE: &str = "system";

pub fn system_stream() -> StreamId {
    StreamId::system_ticks()
}

/// Event: TickRecorded (the tick marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecorded {
    pub tick_id: TickId,
    pub gini: f64,
    pub max_in_degree: u64,
    pub active_edges: u64,
    pub active_mandates: u64,
    pub overdue_mandates: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Payload shared by the warning and halt alarms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationAlarm {
    pub tick_id: TickId,
    pub gini: f64,
    pub threshold: f64,
    pub max_in_degree: u64,
    pub top_recipient: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EscalationRaised (cascaded from a halt when configured).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRaised {
    pub tick_id: TickId,
    pub code: String,
    pub gini: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReviewTriggered (a mandate passed its checkpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTriggered {
    pub tick_id: TickId,
    pub mandate_id: MandateId,
    pub checkpoint_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemEvent {
    TickRecorded(TickRecorded),
    ConcentrationWarning(ConcentrationAlarm),
    ConcentrationHalt(ConcentrationAlarm),
    EscalationRaised(EscalationRaised),
    ReviewTriggered(ReviewTriggered),
}

impl SystemEvent {
    pub const TICK_RECORDED: &'static str = "system.tick_recorded";
    pub const CONCENTRATION_WARNING: &'static str = "system.concentration_warning";
    pub const CONCENTRATION_HALT: &'static str = "system.concentration_halt";
    pub const ESCALATION_RAISED: &'static str = "system.escalation_raised";
    pub const REVIEW_TRIGGERED: &'static str = "mandate.review_triggered";
}

impl Event for SystemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SystemEvent::TickRecorded(_) => Self::TICK_RECORDED,
            SystemEvent::ConcentrationWarning(_) => Self::CONCENTRATION_WARNING,
            SystemEvent::ConcentrationHalt(_) => Self::CONCENTRATION_HALT,
            SystemEvent::EscalationRaised(_) => Self::ESCALATION_RAISED,
            SystemEvent::ReviewTriggered(_) => Self::REVIEW_TRIGGERED,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SystemEvent::TickRecorded(e) => e.occurred_at,
            SystemEvent::ConcentrationWarning(e) | SystemEvent::ConcentrationHalt(e) => e.occurred_at,
            SystemEvent::EscalationRaised(e) => e.occurred_at,
            SystemEvent::ReviewTriggered(e) => e.occurred_at,
        }
    }
}

impl DecodeEvent for SystemEvent {
    fn schema() -> &'static [(&'static str, u32)] {
        &[
            (SystemEvent::TICK_RECORDED, 1),
            (SystemEvent::CONCENTRATION_WARNING, 1),
            (SystemEvent::CONCENTRATION_HALT, 1),
            (SystemEvent::ESCALATION_RAISED, 1),
            (SystemEvent::REVIEW_TRIGGERED, 1),
        ]
    }

    fn decode(event_type: &str, _schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
        match event_type {
            Self::TICK_RECORDED => Ok(SystemEvent::TickRecorded(decode_payload(event_type, payload)?)),
            Self::CONCENTRATION_WARNING => Ok(SystemEvent::ConcentrationWarning(decode_payload(event_type, payload)?)),
            Self::CONCENTRATION_HALT => Ok(SystemEvent::ConcentrationHalt(decode_payload(event_type, payload)?)),
            Self::ESCALATION_RAISED => Ok(SystemEvent::EscalationRaised(decode_payload(event_type, payload)?)),
            Self::REVIEW_TRIGGERED => Ok(SystemEvent::ReviewTriggered(decode_payload(event_type, payload)?)),
            other => Err(SchemaError::UnknownEventType(other.to_string())),
        }
    }

    fn encode(&self) -> Result<JsonValue, SchemaError> {
        let event_type = self.event_type();
        match self {
            SystemEvent::TickRecorded(e) => encode_payload(event_type, e),
            SystemEvent::ConcentrationWarning(e) | SystemEvent::ConcentrationHalt(e) => {
                encode_payload(event_type, e)
            }
            SystemEvent::EscalationRaised(e) => encode_payload(event_type, e),
            SystemEvent::ReviewTriggered(e) => encode_payload(event_type, e),
        }
    }
}
