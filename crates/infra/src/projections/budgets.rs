//! Budgets read model.
//!
//! One view per budget: lifecycle status, the immutable total, and per-item
//! allocation and spend. Rebuildable from `budget.*` events.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use polity_budget::{BudgetEvent, BudgetStatus, FlexClass};
use polity_core::{ActorId, BudgetId};
use polity_events::{DecodeEvent, EventEnvelope, Projection};

use super::decode::GovernanceEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub amount: Decimal,
    pub spent: Decimal,
    pub flex_class: FlexClass,
}

impl ItemView {
    pub fn available(&self) -> Decimal {
        self.amount - self.spent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetView {
    pub budget_id: BudgetId,
    pub name: String,
    pub steward: ActorId,
    pub scope: String,
    pub status: BudgetStatus,
    pub total: Decimal,
    pub items: BTreeMap<String, ItemView>,
    pub expenditures_recorded: u64,
    pub expenditures_rejected: u64,
    /// Stream version of the last event applied to this view.
    pub version: u64,
}

impl BudgetView {
    pub fn allocated(&self) -> Decimal {
        self.items.values().map(|i| i.amount).sum()
    }

    pub fn spent(&self) -> Decimal {
        self.items.values().map(|i| i.spent).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetsProjection {
    budgets: BTreeMap<BudgetId, BudgetView>,
}

impl BudgetsProjection {
    pub fn get(&self, id: BudgetId) -> Option<&BudgetView> {
        self.budgets.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BudgetView> {
        self.budgets.values()
    }

    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }
}

impl Projection for BudgetsProjection {
    type Ev = GovernanceEvent;

    fn name(&self) -> &'static str {
        "budgets"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        BudgetEvent::owns(event_type)
    }

    fn apply(&mut self, envelope: &EventEnvelope<GovernanceEvent>) {
        let GovernanceEvent::Budget(event) = envelope.payload() else {
            return;
        };

        if let BudgetEvent::Created(e) = event {
            let items = e
                .items
                .iter()
                .map(|l| {
                    (
                        l.key.clone(),
                        ItemView {
                            amount: l.amount,
                            spent: Decimal::ZERO,
                            flex_class: l.flex_class,
                        },
                    )
                })
                .collect();
            self.budgets.insert(
                e.budget_id,
                BudgetView {
                    budget_id: e.budget_id,
                    name: e.name.clone(),
                    steward: e.steward,
                    scope: e.scope.clone(),
                    status: BudgetStatus::Draft,
                    total: e.total,
                    items,
                    expenditures_recorded: 0,
                    expenditures_rejected: 0,
                    version: envelope.version(),
                },
            );
            return;
        }

        // Everything else updates an existing view; a stray event for an
        // unknown budget is ignored.
        let Some(view) = self.budgets.get_mut(&event.budget_id()) else {
            return;
        };
        match event {
            BudgetEvent::Created(_) => {}
            BudgetEvent::Activated(_) => view.status = BudgetStatus::Active,
            BudgetEvent::AllocationsAdjusted(e) => {
                for change in &e.changes {
                    if let Some(item) = view.items.get_mut(&change.key) {
                        item.amount = change.new_amount;
                    }
                }
            }
            BudgetEvent::ExpenditureRecorded(e) => {
                if let Some(item) = view.items.get_mut(&e.item) {
                    item.spent += e.amount;
                }
                view.expenditures_recorded += 1;
            }
            BudgetEvent::ExpenditureRejected(_) => view.expenditures_rejected += 1,
            BudgetEvent::Closed(_) => view.status = BudgetStatus::Closed,
        }
        view.version = envelope.version();
    }

    fn reset(&mut self) {
        self.budgets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use polity_budget::{
        AllocationLine, AllocationsAdjusted, AppliedChange, BudgetActivated, BudgetCreated, ExpenditureRecorded,
        STREAM_TYPE, budget_stream,
    };
    use polity_core::{CommandId, EventId};
    use polity_events::Event;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn env(version: u64, ev: BudgetEvent) -> EventEnvelope<GovernanceEvent> {
        EventEnvelope::new(
            EventId::new(),
            budget_stream(ev.budget_id()),
            STREAM_TYPE,
            ev.event_type(),
            version,
            ev.occurred_at(),
            None,
            CommandId::new(),
            GovernanceEvent::Budget(ev),
        )
    }

    #[test]
    fn tracks_lifecycle_allocations_and_spend() {
        let id = BudgetId::new();
        let mut projection = BudgetsProjection::default();
        projection.apply(&env(
            1,
            BudgetEvent::Created(BudgetCreated {
                budget_id: id,
                name: "Parks".to_string(),
                steward: ActorId::new(),
                scope: "parks".to_string(),
                total: Decimal::from(100),
                items: vec![
                    AllocationLine {
                        key: "a".to_string(),
                        amount: Decimal::from(60),
                        flex_class: FlexClass::Flexible,
                    },
                    AllocationLine {
                        key: "b".to_string(),
                        amount: Decimal::from(40),
                        flex_class: FlexClass::Flexible,
                    },
                ],
                occurred_at: t0(),
            }),
        ));
        projection.apply(&env(
            2,
            BudgetEvent::Activated(BudgetActivated {
                budget_id: id,
                occurred_at: t0(),
            }),
        ));
        projection.apply(&env(
            3,
            BudgetEvent::AllocationsAdjusted(AllocationsAdjusted {
                budget_id: id,
                changes: vec![
                    AppliedChange {
                        key: "a".to_string(),
                        delta: Decimal::from(-10),
                        new_amount: Decimal::from(50),
                    },
                    AppliedChange {
                        key: "b".to_string(),
                        delta: Decimal::from(10),
                        new_amount: Decimal::from(50),
                    },
                ],
                memo: None,
                occurred_at: t0(),
            }),
        ));
        projection.apply(&env(
            4,
            BudgetEvent::ExpenditureRecorded(ExpenditureRecorded {
                budget_id: id,
                expenditure_id: Uuid::now_v7(),
                item: "a".to_string(),
                amount: Decimal::from(20),
                memo: None,
                occurred_at: t0(),
            }),
        ));

        let view = projection.get(id).unwrap();
        assert_eq!(view.status, BudgetStatus::Active);
        assert_eq!(view.allocated(), view.total);
        assert_eq!(view.items["a"].available(), Decimal::from(30));
        assert_eq!(view.spent(), Decimal::from(20));
        assert_eq!(view.expenditures_recorded, 1);
        assert_eq!(view.version, 4);
    }

    #[test]
    fn events_for_unknown_budgets_are_ignored() {
        let mut projection = BudgetsProjection::default();
        projection.apply(&env(
            1,
            BudgetEvent::Activated(BudgetActivated {
                budget_id: BudgetId::new(),
                occurred_at: t0(),
            }),
        ));
        assert!(projection.is_empty());
    }
}
