use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use polity_core::{ActorId, BudgetId, GateViolation, StreamId};
use polity_events::{DecodeEvent, Event, SchemaError, decode_payload, encode_payload};

use crate::policy::FlexClass;

pub const STREAM_TYPE: &str = "budget";

pub fn budget_stream(id: BudgetId) -> StreamId {
    StreamId::for_entity(STREAM_TYPE, *id.as_uuid())
}

/// One allocation item as recorded at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub key: String,
    pub amount: Decimal,
    pub flex_class: FlexClass,
}

/// Event: BudgetCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCreated {
    pub budget_id: BudgetId,
    pub name: String,
    pub steward: ActorId,
    pub scope: String,
    /// Immutable for the life of the budget.
    pub total: Decimal,
    pub items: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BudgetActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetActivated {
    pub budget_id: BudgetId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub key: String,
    pub delta: Decimal,
    pub new_amount: Decimal,
}

/// Event: AllocationsAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationsAdjusted {
    pub budget_id: BudgetId,
    pub changes: Vec<AppliedChange>,
    #[serde(default)]
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenditureRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenditureRecorded {
    pub budget_id: BudgetId,
    pub expenditure_id: Uuid,
    pub item: String,
    pub amount: Decimal,
    #[serde(default)]
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenditureRejected (durable record of a denied request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenditureRejected {
    pub budget_id: BudgetId,
    pub expenditure_id: Uuid,
    pub item: String,
    pub amount: Decimal,
    pub violation: GateViolation,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BudgetClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetClosed {
    pub budget_id: BudgetId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetEvent {
    Created(BudgetCreated),
    Activated(BudgetActivated),
    AllocationsAdjusted(AllocationsAdjusted),
    ExpenditureRecorded(ExpenditureRecorded),
    ExpenditureRejected(ExpenditureRejected),
    Closed(BudgetClosed),
}

impl BudgetEvent {
    pub const CREATED: &'static str = "budget.created";
    pub const ACTIVATED: &'static str = "budget.activated";
    pub const ALLOCATIONS_ADJUSTED: &'static str = "budget.allocations_adjusted";
    pub const EXPENDITURE_RECORDED: &'static str = "budget.expenditure_recorded";
    pub const EXPENDITURE_REJECTED: &'static str = "budget.expenditure_rejected";
    pub const CLOSED: &'static str = "budget.closed";

    pub fn budget_id(&self) -> BudgetId {
        match self {
            BudgetEvent::Created(e) => e.budget_id,
            BudgetEvent::Activated(e) => e.budget_id,
            BudgetEvent::AllocationsAdjusted(e) => e.budget_id,
            BudgetEvent::ExpenditureRecorded(e) => e.budget_id,
            BudgetEvent::ExpenditureRejected(e) => e.budget_id,
            BudgetEvent::Closed(e) => e.budget_id,
        }
    }
}

impl Event for BudgetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BudgetEvent::Created(_) => Self::CREATED,
            BudgetEvent::Activated(_) => Self::ACTIVATED,
            BudgetEvent::AllocationsAdjusted(_) => Self::ALLOCATIONS_ADJUSTED,
            BudgetEvent::ExpenditureRecorded(_) => Self::EXPENDITURE_RECORDED,
            BudgetEvent::ExpenditureRejected(_) => Self::EXPENDITURE_REJECTED,
            BudgetEvent::Closed(_) => Self::CLOSED,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BudgetEvent::Created(e) => e.occurred_at,
            BudgetEvent::Activated(e) => e.occurred_at,
            BudgetEvent::AllocationsAdjusted(e) => e.occurred_at,
            BudgetEvent::ExpenditureRecorded(e) => e.occurred_at,
            BudgetEvent::ExpenditureRejected(e) => e.occurred_at,
            BudgetEvent::Closed(e) => e.occurred_at,
        }
    }
}

impl DecodeEvent for BudgetEvent {
    fn schema() -> &'static [(&'static str, u32)] {
        &[
            (BudgetEvent::CREATED, 1),
            (BudgetEvent::ACTIVATED, 1),
            (BudgetEvent::ALLOCATIONS_ADJUSTED, 1),
            (BudgetEvent::EXPENDITURE_RECORDED, 1),
            (BudgetEvent::EXPENDITURE_REJECTED, 1),
            (BudgetEvent::CLOSED, 1),
        ]
    }

    fn decode(event_type: &str, _schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
        let ev = match event_type {
            Self::CREATED => BudgetEvent::Created(decode_payload(event_type, payload)?),
            Self::ACTIVATED => BudgetEvent::Activated(decode_payload(event_type, payload)?),
            Self::ALLOCATIONS_ADJUSTED => BudgetEvent::AllocationsAdjusted(decode_payload(event_type, payload)?),
            Self::EXPENDITURE_RECORDED => BudgetEvent::ExpenditureRecorded(decode_payload(event_type, payload)?),
            Self::EXPENDITURE_REJECTED => BudgetEvent::ExpenditureRejected(decode_payload(event_type, payload)?),
            Self::CLOSED => BudgetEvent::Closed(decode_payload(event_type, payload)?),
            other => return Err(SchemaError::UnknownEventType(other.to_string())),
        };
        Ok(ev)
    }

    fn encode(&self) -> Result<JsonValue, SchemaError> {
        let event_type = self.event_type();
        match self {
            BudgetEvent::Created(e) => encode_payload(event_type, e),
            BudgetEvent::Activated(e) => encode_payload(event_type, e),
            BudgetEvent::AllocationsAdjusted(e) => encode_payload(event_type, e),
            BudgetEvent::ExpenditureRecorded(e) => encode_payload(event_type, e),
            BudgetEvent::ExpenditureRejected(e) => encode_payload(event_type, e),
            BudgetEvent::Closed(e) => encode_payload(event_type, e),
        }
    }
}
