//! Budget domain module (event-sourced).
//!
//! A budget is a fixed total split across named allocation items. Allocation
//! adjustments pass four ordered gates (step size, balance, authority,
//! non-negative residual) and abort on the first failure. Expenditure requests
//! pass their own gates, but a denial is recorded as a
//! `budget.expenditure_rejected` event instead of an error.

pub mod budget;
pub mod command;
pub mod event;
pub mod gates;
pub mod policy;

pub use budget::{Allocation, Budget, BudgetStatus};
pub use command::{
    ActivateBudget, AdjustAllocations, AllocationChange, BudgetCommand, CloseBudget, CreateBudget,
    ItemSpec, RecordExpenditure,
};
pub use event::{
    AllocationLine, AllocationsAdjusted, AppliedChange, BudgetActivated, BudgetClosed, BudgetCreated,
    BudgetEvent, ExpenditureRecorded, ExpenditureRejected, STREAM_TYPE, budget_stream,
};
pub use gates::{
    AdjustmentLine, AvailableFundsGate, BalanceGate, BudgetStateGate, ExpenditureCheck,
    NonNegativeResidualGate, ProposedAdjustment, StepSizeGate,
};
pub use policy::{FlexClass, StepSizePolicy};
