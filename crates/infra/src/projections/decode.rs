//! Union of every event family the kernel persists.
//!
//! Stored records are decoded into this type once, at the store/projection
//! boundary; projections only ever see typed payloads.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use polity_budget::BudgetEvent;
use polity_delegation::DelegationEvent;
use polity_events::{DecodeEvent, Event, SchemaError, SchemaRegistry};
use polity_mandates::MandateEvent;

use crate::triggers::events::SystemEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceEvent {
    Budget(BudgetEvent),
    Delegation(DelegationEvent),
    Mandate(MandateEvent),
    System(SystemEvent),
}

impl Event for GovernanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GovernanceEvent::Budget(e) => e.event_type(),
            GovernanceEvent::Delegation(e) => e.event_type(),
            GovernanceEvent::Mandate(e) => e.event_type(),
            GovernanceEvent::System(e) => e.event_type(),
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            GovernanceEvent::Budget(e) => e.schema_version(),
            GovernanceEvent::Delegation(e) => e.schema_version(),
            GovernanceEvent::Mandate(e) => e.schema_version(),
            GovernanceEvent::System(e) => e.schema_version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GovernanceEvent::Budget(e) => e.occurred_at(),
            GovernanceEvent::Delegation(e) => e.occurred_at(),
            GovernanceEvent::Mandate(e) => e.occurred_at(),
            GovernanceEvent::System(e) => e.occurred_at(),
        }
    }
}

impl DecodeEvent for GovernanceEvent {
    fn schema() -> &'static [(&'static str, u32)] {
        static SCHEMA: OnceLock<Vec<(&'static str, u32)>> = OnceLock::new();
        SCHEMA
            .get_or_init(|| {
                BudgetEvent::schema()
                    .iter()
                    .chain(DelegationEvent::schema())
                    .chain(MandateEvent::schema())
                    .chain(SystemEvent::schema())
                    .copied()
                    .collect()
            })
            .as_slice()
    }

    fn decode(event_type: &str, schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
        if BudgetEvent::owns(event_type) {
            BudgetEvent::decode(event_type, schema_version, payload).map(GovernanceEvent::Budget)
        } else if DelegationEvent::owns(event_type) {
            DelegationEvent::decode(event_type, schema_version, payload).map(GovernanceEvent::Delegation)
        } else if MandateEvent::owns(event_type) {
            MandateEvent::decode(event_type, schema_version, payload).map(GovernanceEvent::Mandate)
        } else if SystemEvent::owns(event_type) {
            SystemEvent::decode(event_type, schema_version, payload).map(GovernanceEvent::System)
        } else {
            Err(SchemaError::UnknownEventType(event_type.to_string()))
        }
    }

    fn encode(&self) -> Result<JsonValue, SchemaError> {
        match self {
            GovernanceEvent::Budget(e) => e.encode(),
            GovernanceEvent::Delegation(e) => e.encode(),
            GovernanceEvent::Mandate(e) => e.encode(),
            GovernanceEvent::System(e) => e.encode(),
        }
    }
}

/// Registry covering every event type the kernel writes.
pub fn governance_registry() -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::new()
        .with_family::<BudgetEvent>()?
        .with_family::<DelegationEvent>()?
        .with_family::<MandateEvent>()?
        .with_family::<SystemEvent>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_family() {
        let registry = governance_registry().unwrap();
        assert_eq!(registry.len(), GovernanceEvent::schema().len());
        assert!(registry.check(BudgetEvent::EXPENDITURE_REJECTED, 1).is_ok());
        assert!(registry.check(DelegationEvent::GRANTED, 1).is_ok());
        assert!(registry.check(MandateEvent::CHARTERED, 1).is_ok());
        assert!(registry.check(SystemEvent::REVIEW_TRIGGERED, 1).is_ok());
    }

    #[test]
    fn unknown_type_is_a_schema_error() {
        let err = GovernanceEvent::decode("budget.teleported", 1, &serde_json::json!({})).unwrap_err();
        assert_eq!(err, SchemaError::UnknownEventType("budget.teleported".to_string()));
    }
}
