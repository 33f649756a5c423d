//! Budget gates.
//!
//! Every gate reads one immutable snapshot: a [`ProposedAdjustment`] (resolved
//! from the rehydrated budget before any gate runs) or an [`ExpenditureCheck`].

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use polity_core::{Gate, GateViolation};

use crate::budget::BudgetStatus;
use crate::policy::{FlexClass, StepSizePolicy};

/// One requested change, resolved against current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentLine {
    pub key: String,
    pub flex_class: FlexClass,
    pub current_amount: Decimal,
    pub spent: Decimal,
    pub delta: Decimal,
    pub new_amount: Decimal,
}

/// Snapshot every adjustment gate evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedAdjustment {
    pub total: Decimal,
    pub lines: Vec<AdjustmentLine>,
    /// Post-change amount of every item (changed or not).
    pub post_change: BTreeMap<String, Decimal>,
}

impl ProposedAdjustment {
    /// `None` when the sum leaves the representable range.
    pub fn post_change_sum(&self) -> Option<Decimal> {
        checked_sum(self.post_change.values().copied())
    }
}

/// Sum that reports overflow instead of panicking.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

/// Per-item `|change| / current_amount <= ceiling(flex_class)`.
#[derive(Debug, Clone)]
pub struct StepSizeGate<'p> {
    policy: &'p StepSizePolicy,
}

impl<'p> StepSizeGate<'p> {
    pub const ID: &'static str = "step_size";

    pub fn new(policy: &'p StepSizePolicy) -> Self {
        Self { policy }
    }
}

impl Gate<ProposedAdjustment> for StepSizeGate<'_> {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, input: &ProposedAdjustment) -> Result<(), GateViolation> {
        for line in &input.lines {
            let ceiling = self.policy.ceiling(line.flex_class);

            if line.current_amount.is_zero() {
                // Percentage is undefined at zero: increases pass, decreases cannot.
                if line.delta < Decimal::ZERO {
                    return Err(GateViolation::new(
                        Self::ID,
                        "step_size_exceeded",
                        format!("item '{}' has no amount to reduce", line.key),
                    )
                    .with_subject(line.key.clone())
                    .with_evidence("current_amount", line.current_amount)
                    .with_evidence("change", line.delta)
                    .with_evidence("max_percent", ceiling));
                }
                continue;
            }

            let magnitude = line.delta.abs();
            if magnitude > ceiling * line.current_amount {
                let ratio = magnitude / line.current_amount;
                return Err(GateViolation::new(
                    Self::ID,
                    "step_size_exceeded",
                    format!(
                        "item '{}' changes by {} of {} ({} > {} for {} items)",
                        line.key,
                        line.delta,
                        line.current_amount,
                        ratio,
                        ceiling,
                        line.flex_class.as_str()
                    ),
                )
                .with_subject(line.key.clone())
                .with_evidence("current_amount", line.current_amount)
                .with_evidence("change", line.delta)
                .with_evidence("ratio", ratio)
                .with_evidence("max_percent", ceiling));
            }
        }
        Ok(())
    }
}

/// Post-change sum across every item equals the immutable total, exactly.
#[derive(Debug, Default, Copy, Clone)]
pub struct BalanceGate;

impl BalanceGate {
    pub const ID: &'static str = "balance";

    pub fn check(total: Decimal, sum: Decimal) -> Result<(), GateViolation> {
        if sum == total {
            return Ok(());
        }
        Err(GateViolation::new(
            Self::ID,
            "sum_mismatch",
            format!("items sum to {sum}, budget total is {total}"),
        )
        .with_evidence("total", total)
        .with_evidence("post_change_sum", sum)
        .with_evidence("difference", sum - total))
    }
}

impl Gate<ProposedAdjustment> for BalanceGate {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, input: &ProposedAdjustment) -> Result<(), GateViolation> {
        match input.post_change_sum() {
            Some(sum) => Self::check(input.total, sum),
            None => Err(GateViolation::new(
                Self::ID,
                "sum_mismatch",
                format!("items sum beyond the representable range, budget total is {}", input.total),
            )
            .with_evidence("total", input.total)),
        }
    }
}

/// A reduction may not take an item below what has already been spent from it.
#[derive(Debug, Default, Copy, Clone)]
pub struct NonNegativeResidualGate;

impl NonNegativeResidualGate {
    pub const ID: &'static str = "non_negative_residual";
}

impl Gate<ProposedAdjustment> for NonNegativeResidualGate {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, input: &ProposedAdjustment) -> Result<(), GateViolation> {
        for line in &input.lines {
            if line.new_amount < line.spent {
                return Err(GateViolation::new(
                    Self::ID,
                    "below_committed",
                    format!(
                        "item '{}' would drop to {} but {} is already spent",
                        line.key, line.new_amount, line.spent
                    ),
                )
                .with_subject(line.key.clone())
                .with_evidence("new_amount", line.new_amount)
                .with_evidence("spent", line.spent)
                .with_evidence("shortfall", line.spent - line.new_amount));
            }
        }
        Ok(())
    }
}

/// Snapshot the expenditure gates evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenditureCheck {
    pub status: BudgetStatus,
    pub item: String,
    pub amount: Decimal,
    pub allocated: Decimal,
    pub spent: Decimal,
}

impl ExpenditureCheck {
    pub fn available(&self) -> Decimal {
        self.allocated - self.spent
    }
}

/// Only active budgets accept expenditures.
#[derive(Debug, Default, Copy, Clone)]
pub struct BudgetStateGate;

impl BudgetStateGate {
    pub const ID: &'static str = "budget_state";
}

impl Gate<ExpenditureCheck> for BudgetStateGate {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, input: &ExpenditureCheck) -> Result<(), GateViolation> {
        if input.status == BudgetStatus::Active {
            return Ok(());
        }
        Err(GateViolation::new(
            Self::ID,
            "budget_not_active",
            format!("budget is {}", input.status.as_str()),
        ))
    }
}

/// `amount <= allocated - spent` for the requested item.
#[derive(Debug, Default, Copy, Clone)]
pub struct AvailableFundsGate;

impl AvailableFundsGate {
    pub const ID: &'static str = "available_funds";
}

impl Gate<ExpenditureCheck> for AvailableFundsGate {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, input: &ExpenditureCheck) -> Result<(), GateViolation> {
        let available = input.available();
        if input.amount <= available {
            return Ok(());
        }
        Err(GateViolation::new(
            Self::ID,
            "insufficient_funds",
            format!(
                "item '{}' has {} available, {} requested",
                input.item, available, input.amount
            ),
        )
        .with_subject(input.item.clone())
        .with_evidence("requested", input.amount)
        .with_evidence("available", available)
        .with_evidence("allocated", input.allocated)
        .with_evidence("spent", input.spent))
    }
}
