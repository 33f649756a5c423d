use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use polity_core::{
    ActorId, Aggregate, AggregateRoot, AuthorityGate, AuthorityRequest, BudgetId, CommandContext,
    DomainError, GatePipeline,
};

use crate::command::{
    ActivateBudget, AdjustAllocations, BudgetCommand, CloseBudget, CreateBudget, RecordExpenditure,
};
use crate::event::{
    AllocationLine, AllocationsAdjusted, AppliedChange, BudgetActivated, BudgetClosed, BudgetCreated,
    BudgetEvent, ExpenditureRecorded, ExpenditureRejected,
};
use crate::gates::{
    AdjustmentLine, AvailableFundsGate, BalanceGate, BudgetStateGate, ExpenditureCheck,
    NonNegativeResidualGate, ProposedAdjustment, StepSizeGate, checked_sum,
};
use crate::policy::{FlexClass, StepSizePolicy};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Draft,
    Active,
    Closed,
}

impl BudgetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetStatus::Draft => "draft",
            BudgetStatus::Active => "active",
            BudgetStatus::Closed => "closed",
        }
    }
}

/// Current state of one allocation item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub amount: Decimal,
    pub spent: Decimal,
    pub flex_class: FlexClass,
}

/// Aggregate root: Budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budget {
    id: BudgetId,
    policy: StepSizePolicy,
    created: bool,
    status: BudgetStatus,
    name: String,
    steward: Option<ActorId>,
    scope: String,
    total: Decimal,
    items: BTreeMap<String, Allocation>,
    expenditures: BTreeSet<Uuid>,
    version: u64,
}

impl Budget {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BudgetId, policy: StepSizePolicy) -> Self {
        Self {
            id,
            policy,
            created: false,
            status: BudgetStatus::Draft,
            name: String::new(),
            steward: None,
            scope: String::new(),
            total: Decimal::ZERO,
            items: BTreeMap::new(),
            expenditures: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> BudgetStatus {
        self.status
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn items(&self) -> &BTreeMap<String, Allocation> {
        &self.items
    }

    pub fn allocated_sum(&self) -> Decimal {
        self.items.values().map(|a| a.amount).sum()
    }
}

impl AggregateRoot for Budget {
    type Id = BudgetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Budget {
    type Command = BudgetCommand;
    type Event = BudgetEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BudgetEvent::Created(e) => {
                self.id = e.budget_id;
                self.created = true;
                self.status = BudgetStatus::Draft;
                self.name = e.name.clone();
                self.steward = Some(e.steward);
                self.scope = e.scope.clone();
                self.total = e.total;
                self.items = e
                    .items
                    .iter()
                    .map(|l| {
                        (
                            l.key.clone(),
                            Allocation {
                                amount: l.amount,
                                spent: Decimal::ZERO,
                                flex_class: l.flex_class,
                            },
                        )
                    })
                    .collect();
            }
            BudgetEvent::Activated(_) => {
                self.status = BudgetStatus::Active;
            }
            BudgetEvent::AllocationsAdjusted(e) => {
                for change in &e.changes {
                    if let Some(item) = self.items.get_mut(&change.key) {
                        item.amount = change.new_amount;
                    }
                }
            }
            BudgetEvent::ExpenditureRecorded(e) => {
                self.expenditures.insert(e.expenditure_id);
                if let Some(item) = self.items.get_mut(&e.item) {
                    item.spent += e.amount;
                }
            }
            BudgetEvent::ExpenditureRejected(e) => {
                self.expenditures.insert(e.expenditure_id);
            }
            BudgetEvent::Closed(_) => {
                self.status = BudgetStatus::Closed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(
        &self,
        command: &Self::Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BudgetCommand::Create(cmd) => self.handle_create(cmd, ctx),
            BudgetCommand::Activate(cmd) => self.handle_activate(cmd, ctx),
            BudgetCommand::AdjustAllocations(cmd) => self.handle_adjust(cmd, ctx),
            BudgetCommand::RecordExpenditure(cmd) => self.handle_expenditure(cmd, ctx),
            BudgetCommand::Close(cmd) => self.handle_close(cmd, ctx),
        }
    }
}

impl Budget {
    fn ensure_budget_id(&self, budget_id: BudgetId) -> Result<(), DomainError> {
        if self.id != budget_id {
            return Err(DomainError::validation("budget_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<ActorId, DomainError> {
        match (self.created, self.steward) {
            (true, Some(steward)) => Ok(steward),
            _ => Err(DomainError::not_found(format!("budget {}", self.id))),
        }
    }

    fn authority_request(&self, steward: ActorId, ctx: &CommandContext<'_>) -> AuthorityRequest {
        AuthorityRequest {
            actor: ctx.actor,
            principal: steward,
            scope: self.scope.clone(),
            at: ctx.now,
        }
    }

    fn check_authority(&self, steward: ActorId, ctx: &CommandContext<'_>) -> Result<(), DomainError> {
        let request = self.authority_request(steward, ctx);
        let gate = AuthorityGate::new(ctx.authority, move |_: &()| request.clone());
        GatePipeline::<()>::new().then(&gate).evaluate(&())?;
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBudget, ctx: &CommandContext<'_>) -> Result<Vec<BudgetEvent>, DomainError> {
        self.ensure_budget_id(cmd.budget_id)?;
        if self.created {
            return Err(DomainError::conflict("budget already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.scope.trim().is_empty() {
            return Err(DomainError::validation("scope cannot be empty"));
        }
        if cmd.total < Decimal::ZERO {
            return Err(DomainError::validation("total cannot be negative"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("budget needs at least one item"));
        }

        let mut seen = BTreeSet::new();
        for item in &cmd.items {
            if item.key.trim().is_empty() {
                return Err(DomainError::validation("item key cannot be empty"));
            }
            if !seen.insert(item.key.as_str()) {
                return Err(DomainError::validation(format!("duplicate item key '{}'", item.key)));
            }
            if item.amount < Decimal::ZERO {
                return Err(DomainError::validation(format!("item '{}' amount cannot be negative", item.key)));
            }
        }

        let sum = checked_sum(cmd.items.iter().map(|i| i.amount))
            .ok_or_else(|| DomainError::validation("amount out of range"))?;
        BalanceGate::check(cmd.total, sum)?;

        let request = AuthorityRequest {
            actor: ctx.actor,
            principal: cmd.steward,
            scope: cmd.scope.clone(),
            at: ctx.now,
        };
        let authority = AuthorityGate::new(ctx.authority, move |_: &()| request.clone());
        GatePipeline::<()>::new().then(&authority).evaluate(&())?;

        Ok(vec![BudgetEvent::Created(BudgetCreated {
            budget_id: cmd.budget_id,
            name: cmd.name.trim().to_string(),
            steward: cmd.steward,
            scope: cmd.scope.clone(),
            total: cmd.total,
            items: cmd
                .items
                .iter()
                .map(|i| AllocationLine {
                    key: i.key.clone(),
                    amount: i.amount,
                    flex_class: i.flex_class,
                })
                .collect(),
            occurred_at: ctx.now,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateBudget, ctx: &CommandContext<'_>) -> Result<Vec<BudgetEvent>, DomainError> {
        self.ensure_budget_id(cmd.budget_id)?;
        let steward = self.ensure_created()?;
        if self.status != BudgetStatus::Draft {
            return Err(DomainError::conflict(format!(
                "only draft budgets can be activated (budget is {})",
                self.status.as_str()
            )));
        }
        self.check_authority(steward, ctx)?;

        Ok(vec![BudgetEvent::Activated(BudgetActivated {
            budget_id: cmd.budget_id,
            occurred_at: ctx.now,
        })])
    }

    /// Resolve requested changes into the snapshot the adjustment gates read.
    ///
    /// Unknown or duplicated keys are malformed input, not gate failures.
    fn propose(&self, cmd: &AdjustAllocations) -> Result<ProposedAdjustment, DomainError> {
        if cmd.changes.is_empty() {
            return Err(DomainError::validation("adjustment has no changes"));
        }

        let mut post_change: BTreeMap<String, Decimal> =
            self.items.iter().map(|(k, a)| (k.clone(), a.amount)).collect();
        let mut lines = Vec::with_capacity(cmd.changes.len());
        let mut seen = BTreeSet::new();

        for change in &cmd.changes {
            if !seen.insert(change.key.as_str()) {
                return Err(DomainError::validation(format!("item '{}' changed twice", change.key)));
            }
            let item = self
                .items
                .get(&change.key)
                .ok_or_else(|| DomainError::validation(format!("unknown item '{}'", change.key)))?;
            let new_amount = item
                .amount
                .checked_add(change.delta)
                .ok_or_else(|| DomainError::validation("amount out of range"))?;
            post_change.insert(change.key.clone(), new_amount);
            lines.push(AdjustmentLine {
                key: change.key.clone(),
                flex_class: item.flex_class,
                current_amount: item.amount,
                spent: item.spent,
                delta: change.delta,
                new_amount,
            });
        }

        let proposal = ProposedAdjustment {
            total: self.total,
            lines,
            post_change,
        };
        if proposal.post_change_sum().is_none() {
            return Err(DomainError::validation("amount out of range"));
        }
        Ok(proposal)
    }

    fn handle_adjust(&self, cmd: &AdjustAllocations, ctx: &CommandContext<'_>) -> Result<Vec<BudgetEvent>, DomainError> {
        self.ensure_budget_id(cmd.budget_id)?;
        let steward = self.ensure_created()?;
        if self.status == BudgetStatus::Closed {
            return Err(DomainError::conflict("budget is closed"));
        }

        let proposal = self.propose(cmd)?;

        let request = self.authority_request(steward, ctx);
        let step_size = StepSizeGate::new(&self.policy);
        let authority = AuthorityGate::new(ctx.authority, move |_: &ProposedAdjustment| request.clone());
        GatePipeline::<ProposedAdjustment>::new()
            .then(&step_size)
            .then(&BalanceGate)
            .then(&authority)
            .then(&NonNegativeResidualGate)
            .evaluate(&proposal)?;

        Ok(vec![BudgetEvent::AllocationsAdjusted(AllocationsAdjusted {
            budget_id: cmd.budget_id,
            changes: proposal
                .lines
                .into_iter()
                .map(|l| AppliedChange {
                    key: l.key,
                    delta: l.delta,
                    new_amount: l.new_amount,
                })
                .collect(),
            memo: cmd.memo.clone(),
            occurred_at: ctx.now,
        })])
    }

    /// Expenditure requests keep denied attempts in the audit trail: a failing
    /// gate becomes `ExpenditureRejected`. Malformed requests still error.
    fn handle_expenditure(
        &self,
        cmd: &RecordExpenditure,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<BudgetEvent>, DomainError> {
        self.ensure_budget_id(cmd.budget_id)?;
        let steward = self.ensure_created()?;
        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("expenditure amount must be positive"));
        }
        if self.expenditures.contains(&cmd.expenditure_id) {
            return Err(DomainError::conflict(format!(
                "expenditure {} already decided",
                cmd.expenditure_id
            )));
        }
        let item = self
            .items
            .get(&cmd.item)
            .ok_or_else(|| DomainError::validation(format!("unknown item '{}'", cmd.item)))?;

        let check = ExpenditureCheck {
            status: self.status,
            item: cmd.item.clone(),
            amount: cmd.amount,
            allocated: item.amount,
            spent: item.spent,
        };
        let request = self.authority_request(steward, ctx);
        let authority = AuthorityGate::new(ctx.authority, move |_: &ExpenditureCheck| request.clone());
        let verdict = GatePipeline::<ExpenditureCheck>::new()
            .then(&BudgetStateGate)
            .then(&authority)
            .then(&AvailableFundsGate)
            .evaluate(&check);

        let event = match verdict {
            Ok(()) => BudgetEvent::ExpenditureRecorded(ExpenditureRecorded {
                budget_id: cmd.budget_id,
                expenditure_id: cmd.expenditure_id,
                item: cmd.item.clone(),
                amount: cmd.amount,
                memo: cmd.memo.clone(),
                occurred_at: ctx.now,
            }),
            Err(violation) => BudgetEvent::ExpenditureRejected(ExpenditureRejected {
                budget_id: cmd.budget_id,
                expenditure_id: cmd.expenditure_id,
                item: cmd.item.clone(),
                amount: cmd.amount,
                violation,
                occurred_at: ctx.now,
            }),
        };
        Ok(vec![event])
    }

    fn handle_close(&self, cmd: &CloseBudget, ctx: &CommandContext<'_>) -> Result<Vec<BudgetEvent>, DomainError> {
        self.ensure_budget_id(cmd.budget_id)?;
        let steward = self.ensure_created()?;
        if self.status == BudgetStatus::Closed {
            return Err(DomainError::conflict("budget already closed"));
        }
        self.check_authority(steward, ctx)?;

        Ok(vec![BudgetEvent::Closed(BudgetClosed {
            budget_id: cmd.budget_id,
            occurred_at: ctx.now,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use polity_core::{Authority, AuthorityDecision, Unrestricted};
    use polity_events::execute;
    use proptest::prelude::*;

    use crate::command::{AllocationChange, ItemSpec};

    struct StewardOnly;

    impl Authority for StewardOnly {
        fn check(&self, request: &AuthorityRequest) -> AuthorityDecision {
            if request.actor == Some(request.principal) {
                AuthorityDecision::Granted
            } else {
                AuthorityDecision::Denied("actor is not the steward".to_string())
            }
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn ctx(actor: Option<ActorId>) -> CommandContext<'static> {
        CommandContext::new(test_time(), actor, &Unrestricted)
    }

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn create_cmd(budget_id: BudgetId, steward: ActorId) -> CreateBudget {
        CreateBudget {
            budget_id,
            name: "Parks".to_string(),
            steward,
            scope: "budget:parks".to_string(),
            total: d(700_000),
            items: vec![
                ItemSpec {
                    key: "a".to_string(),
                    amount: d(500_000),
                    flex_class: FlexClass::Rigid,
                },
                ItemSpec {
                    key: "b".to_string(),
                    amount: d(200_000),
                    flex_class: FlexClass::Standard,
                },
            ],
        }
    }

    fn active_budget(steward: ActorId) -> Budget {
        let id = BudgetId::new();
        let mut budget = Budget::empty(id, StepSizePolicy::default());
        execute(&mut budget, &BudgetCommand::Create(create_cmd(id, steward)), &ctx(Some(steward))).unwrap();
        execute(
            &mut budget,
            &BudgetCommand::Activate(ActivateBudget { budget_id: id }),
            &ctx(Some(steward)),
        )
        .unwrap();
        budget
    }

    fn adjust(budget: &Budget, changes: &[(&str, i64)]) -> BudgetCommand {
        BudgetCommand::AdjustAllocations(AdjustAllocations {
            budget_id: *budget.id(),
            changes: changes
                .iter()
                .map(|(k, delta)| AllocationChange {
                    key: k.to_string(),
                    delta: d(*delta),
                })
                .collect(),
            memo: None,
        })
    }

    #[test]
    fn create_rejects_items_not_summing_to_total() {
        let id = BudgetId::new();
        let steward = ActorId::new();
        let budget = Budget::empty(id, StepSizePolicy::default());
        let mut cmd = create_cmd(id, steward);
        cmd.total = d(700_001);

        let err = budget.handle(&BudgetCommand::Create(cmd), &ctx(Some(steward))).unwrap_err();
        let violation = err.violation().expect("gate violation");
        assert_eq!(violation.gate, "balance");
        assert_eq!(violation.evidence("difference"), Some(d(-1)));
    }

    #[test]
    fn create_with_overflowing_items_is_a_validation_error() {
        let id = BudgetId::new();
        let steward = ActorId::new();
        let budget = Budget::empty(id, StepSizePolicy::default());
        let mut cmd = create_cmd(id, steward);
        cmd.items[0].amount = Decimal::MAX;
        cmd.items[1].amount = Decimal::MAX;

        let err = budget.handle(&BudgetCommand::Create(cmd), &ctx(Some(steward))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg == "amount out of range"));
    }

    #[test]
    fn overflowing_delta_is_a_validation_error() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let cmd = BudgetCommand::AdjustAllocations(AdjustAllocations {
            budget_id: *budget.id(),
            changes: vec![AllocationChange {
                key: "a".to_string(),
                delta: Decimal::MAX,
            }],
            memo: None,
        });

        let err = budget.handle(&cmd, &ctx(Some(steward))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg == "amount out of range"));
    }

    #[test]
    fn create_rejects_duplicate_keys() {
        let id = BudgetId::new();
        let budget = Budget::empty(id, StepSizePolicy::default());
        let mut cmd = create_cmd(id, ActorId::new());
        cmd.items[1].key = "a".to_string();
        let err = budget.handle(&BudgetCommand::Create(cmd), &ctx(None)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn adjustment_at_ceiling_is_accepted() {
        let steward = ActorId::new();
        let mut budget = active_budget(steward);
        let cmd = adjust(&budget, &[("a", -25_000), ("b", 25_000)]);
        let events = execute(&mut budget, &cmd, &ctx(Some(steward))).unwrap();

        match &events[0] {
            BudgetEvent::AllocationsAdjusted(e) => {
                assert_eq!(e.changes[0].new_amount, d(475_000));
                assert_eq!(e.changes[1].new_amount, d(225_000));
            }
            _ => panic!("Expected AllocationsAdjusted"),
        }
        assert_eq!(budget.allocated_sum(), budget.total());
    }

    #[test]
    fn adjustment_over_ceiling_names_step_size() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let err = budget
            .handle(&adjust(&budget, &[("a", -30_000), ("b", 30_000)]), &ctx(Some(steward)))
            .unwrap_err();

        let violation = err.violation().expect("gate violation");
        assert_eq!(violation.gate, "step_size");
        assert_eq!(violation.evidence("max_percent"), Some(Decimal::new(5, 2)));
    }

    #[test]
    fn step_size_runs_before_balance() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        // Too large and unbalanced: step size must be the reported gate.
        let err = budget
            .handle(&adjust(&budget, &[("a", -100_000)]), &ctx(Some(steward)))
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.gate.as_str()), Some("step_size"));
    }

    #[test]
    fn unbalanced_adjustment_is_rejected() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let err = budget
            .handle(&adjust(&budget, &[("a", -10_000), ("b", 9_000)]), &ctx(Some(steward)))
            .unwrap_err();
        let violation = err.violation().expect("gate violation");
        assert_eq!(violation.gate, "balance");
        assert_eq!(violation.evidence("post_change_sum"), Some(d(699_000)));
    }

    #[test]
    fn authority_gate_runs_after_balance() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let stranger = ActorId::new();
        let strict = CommandContext::new(test_time(), Some(stranger), &StewardOnly);

        let err = budget
            .handle(&adjust(&budget, &[("a", -10_000), ("b", 10_000)]), &strict)
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.gate.as_str()), Some("authority"));

        let err = budget
            .handle(&adjust(&budget, &[("a", -10_000), ("b", 9_000)]), &strict)
            .unwrap_err();
        assert_eq!(err.violation().map(|v| v.gate.as_str()), Some("balance"));
    }

    #[test]
    fn reduction_below_spent_is_rejected() {
        let steward = ActorId::new();
        let mut budget = active_budget(steward);
        let spend = BudgetCommand::RecordExpenditure(RecordExpenditure {
            budget_id: *budget.id(),
            expenditure_id: Uuid::now_v7(),
            item: "b".to_string(),
            amount: d(195_000),
            memo: None,
        });
        execute(&mut budget, &spend, &ctx(Some(steward))).unwrap();

        let err = budget
            .handle(&adjust(&budget, &[("b", -10_000), ("a", 10_000)]), &ctx(Some(steward)))
            .unwrap_err();
        let violation = err.violation().expect("gate violation");
        assert_eq!(violation.gate, "non_negative_residual");
        assert_eq!(violation.evidence("spent"), Some(d(195_000)));
    }

    #[test]
    fn unknown_item_is_validation_error() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let err = budget.handle(&adjust(&budget, &[("zzz", 1)]), &ctx(Some(steward))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn denied_expenditure_becomes_rejection_event() {
        let steward = ActorId::new();
        let mut budget = active_budget(steward);
        let cmd = RecordExpenditure {
            budget_id: *budget.id(),
            expenditure_id: Uuid::now_v7(),
            item: "b".to_string(),
            amount: d(200_001),
            memo: Some("too much".to_string()),
        };
        let events = execute(&mut budget, &BudgetCommand::RecordExpenditure(cmd), &ctx(Some(steward))).unwrap();

        match &events[0] {
            BudgetEvent::ExpenditureRejected(e) => {
                assert_eq!(e.violation.gate, "available_funds");
                assert_eq!(e.violation.reason_code, "insufficient_funds");
                assert_eq!(e.violation.evidence("available"), Some(d(200_000)));
            }
            other => panic!("Expected ExpenditureRejected, got {other:?}"),
        }
        assert_eq!(budget.items()["b"].spent, Decimal::ZERO);
        assert_eq!(budget.version(), 3);
    }

    #[test]
    fn expenditure_on_draft_budget_is_recorded_as_rejected() {
        let id = BudgetId::new();
        let steward = ActorId::new();
        let mut budget = Budget::empty(id, StepSizePolicy::default());
        execute(&mut budget, &BudgetCommand::Create(create_cmd(id, steward)), &ctx(Some(steward))).unwrap();

        let events = budget
            .handle(
                &BudgetCommand::RecordExpenditure(RecordExpenditure {
                    budget_id: id,
                    expenditure_id: Uuid::now_v7(),
                    item: "a".to_string(),
                    amount: d(1),
                    memo: None,
                }),
                &ctx(Some(steward)),
            )
            .unwrap();
        match &events[0] {
            BudgetEvent::ExpenditureRejected(e) => assert_eq!(e.violation.gate, "budget_state"),
            other => panic!("Expected ExpenditureRejected, got {other:?}"),
        }
    }

    #[test]
    fn malformed_expenditure_still_errors() {
        let steward = ActorId::new();
        let budget = active_budget(steward);
        let err = budget
            .handle(
                &BudgetCommand::RecordExpenditure(RecordExpenditure {
                    budget_id: *budget.id(),
                    expenditure_id: Uuid::now_v7(),
                    item: "a".to_string(),
                    amount: d(0),
                    memo: None,
                }),
                &ctx(Some(steward)),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_on_missing_budget_are_not_found() {
        let id = BudgetId::new();
        let budget = Budget::empty(id, StepSizePolicy::default());
        let err = budget
            .handle(&BudgetCommand::Activate(ActivateBudget { budget_id: id }), &ctx(None))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn closed_budget_rejects_adjustment() {
        let steward = ActorId::new();
        let mut budget = active_budget(steward);
        let close = BudgetCommand::Close(CloseBudget { budget_id: *budget.id() });
        execute(&mut budget, &close, &ctx(Some(steward))).unwrap();
        assert_eq!(budget.status(), BudgetStatus::Closed);
        let err = budget
            .handle(&adjust(&budget, &[("a", -1), ("b", 1)]), &ctx(Some(steward)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every accepted adjustment leaves the item sum equal to the
        /// total fixed at creation.
        #[test]
        fn accepted_adjustments_preserve_total(
            moves in prop::collection::vec((0usize..3, 0usize..3, 1i64..40_000i64), 1..20)
        ) {
            let id = BudgetId::new();
            let steward = ActorId::new();
            let mut budget = Budget::empty(id, StepSizePolicy::default());
            let keys = ["a", "b", "c"];
            execute(
                &mut budget,
                &BudgetCommand::Create(CreateBudget {
                    budget_id: id,
                    name: "p".to_string(),
                    steward,
                    scope: "s".to_string(),
                    total: d(600_000),
                    items: vec![
                        ItemSpec { key: "a".to_string(), amount: d(300_000), flex_class: FlexClass::Rigid },
                        ItemSpec { key: "b".to_string(), amount: d(200_000), flex_class: FlexClass::Standard },
                        ItemSpec { key: "c".to_string(), amount: d(100_000), flex_class: FlexClass::Flexible },
                    ],
                }),
                &ctx(Some(steward)),
            ).unwrap();

            for (from, to, amount) in moves {
                if from == to {
                    continue;
                }
                let cmd = adjust(&budget, &[(keys[from], -amount), (keys[to], amount)]);
                match execute(&mut budget, &cmd, &ctx(Some(steward))) {
                    Ok(_) => {}
                    Err(DomainError::Rejected(v)) => {
                        prop_assert!(v.gate == "step_size" || v.gate == "non_negative_residual");
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
                prop_assert_eq!(budget.allocated_sum(), d(600_000));
            }
        }
    }
}
