use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use polity_core::{ActorId, BudgetId, StreamId};
use polity_events::Command;

use crate::event::budget_stream;
use crate::policy::FlexClass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub key: String,
    pub amount: Decimal,
    pub flex_class: FlexClass,
}

/// Command: CreateBudget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBudget {
    pub budget_id: BudgetId,
    pub name: String,
    pub steward: ActorId,
    pub scope: String,
    pub total: Decimal,
    pub items: Vec<ItemSpec>,
}

/// Command: ActivateBudget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateBudget {
    pub budget_id: BudgetId,
}

/// Signed change to one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationChange {
    pub key: String,
    pub delta: Decimal,
}

/// Command: AdjustAllocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustAllocations {
    pub budget_id: BudgetId,
    pub changes: Vec<AllocationChange>,
    pub memo: Option<String>,
}

/// Command: RecordExpenditure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpenditure {
    pub budget_id: BudgetId,
    pub expenditure_id: Uuid,
    pub item: String,
    pub amount: Decimal,
    pub memo: Option<String>,
}

/// Command: CloseBudget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseBudget {
    pub budget_id: BudgetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetCommand {
    Create(CreateBudget),
    Activate(ActivateBudget),
    AdjustAllocations(AdjustAllocations),
    RecordExpenditure(RecordExpenditure),
    Close(CloseBudget),
}

impl BudgetCommand {
    pub fn budget_id(&self) -> BudgetId {
        match self {
            BudgetCommand::Create(c) => c.budget_id,
            BudgetCommand::Activate(c) => c.budget_id,
            BudgetCommand::AdjustAllocations(c) => c.budget_id,
            BudgetCommand::RecordExpenditure(c) => c.budget_id,
            BudgetCommand::Close(c) => c.budget_id,
        }
    }
}

impl Command for BudgetCommand {
    fn target_stream(&self) -> StreamId {
        budget_stream(self.budget_id())
    }

    fn command_type(&self) -> &'static str {
        match self {
            BudgetCommand::Create(_) => "budget.create",
            BudgetCommand::Activate(_) => "budget.activate",
            BudgetCommand::AdjustAllocations(_) => "budget.adjust_allocations",
            BudgetCommand::RecordExpenditure(_) => "budget.record_expenditure",
            BudgetCommand::Close(_) => "budget.close",
        }
    }
}
