//! Audit trail of recorded expenditure rejections.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use polity_budget::BudgetEvent;
use polity_core::{BudgetId, EventId};
use polity_events::{EventEnvelope, Projection};

use super::decode::GovernanceEvent;

/// One denied expenditure, with everything needed to reconstruct the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialRecord {
    pub event_id: EventId,
    pub expenditure_id: Uuid,
    pub item: String,
    pub amount: Decimal,
    pub gate: String,
    pub reason_code: String,
    pub message: String,
    pub subject: Option<String>,
    pub evidence: BTreeMap<String, Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DenialsProjection {
    by_budget: BTreeMap<BudgetId, Vec<DenialRecord>>,
}

impl DenialsProjection {
    /// Denials for one budget, oldest first.
    pub fn for_budget(&self, id: BudgetId) -> &[DenialRecord] {
        self.by_budget.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.by_budget.values().map(Vec::len).sum()
    }

    /// Denial counts keyed by reason code.
    pub fn by_reason(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in self.by_budget.values().flatten() {
            *counts.entry(record.reason_code.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl Projection for DenialsProjection {
    type Ev = GovernanceEvent;

    fn name(&self) -> &'static str {
        "denials"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == BudgetEvent::EXPENDITURE_REJECTED
    }

    fn apply(&mut self, envelope: &EventEnvelope<GovernanceEvent>) {
        let GovernanceEvent::Budget(BudgetEvent::ExpenditureRejected(e)) = envelope.payload() else {
            return;
        };
        self.by_budget.entry(e.budget_id).or_default().push(DenialRecord {
            event_id: envelope.event_id(),
            expenditure_id: e.expenditure_id,
            item: e.item.clone(),
            amount: e.amount,
            gate: e.violation.gate.clone(),
            reason_code: e.violation.reason_code.clone(),
            message: e.violation.message.clone(),
            subject: e.violation.subject.clone(),
            evidence: e.violation.evidence.clone(),
            occurred_at: e.occurred_at,
        });
    }

    fn reset(&mut self) {
        self.by_budget.clear();
    }
}
