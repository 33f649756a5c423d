//! Ordered, all-must-pass gate evaluation.
//!
//! A command handler builds a [`GatePipeline`] over one unchanging snapshot and
//! evaluates it before producing any event. The first failing gate stops the
//! pipeline; its [`GateViolation`] names the gate, a stable reason code and the
//! exact numeric values that caused the denial.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Typed denial produced by a gate.
///
/// `gate` and `reason_code` are stable machine-readable strings (e.g.
/// `"step_size"` / `"step_size_exceeded"`). `evidence` holds the numeric values
/// needed to reconstruct the decision without re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateViolation {
    pub gate: String,
    pub reason_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub evidence: BTreeMap<String, Decimal>,
}

impl GateViolation {
    pub fn new(gate: &str, reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            gate: gate.to_string(),
            reason_code: reason_code.to_string(),
            message: message.into(),
            subject: None,
            evidence: BTreeMap::new(),
        }
    }

    /// Entity the violation is about (item key, actor id, ...).
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_evidence(mut self, key: &str, value: Decimal) -> Self {
        self.evidence.insert(key.to_string(), value);
        self
    }

    pub fn evidence(&self, key: &str) -> Option<Decimal> {
        self.evidence.get(key).copied()
    }
}

impl core::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}): {}", self.gate, self.reason_code, self.message)
    }
}

/// One step of an ordered validation sequence over input `I`.
pub trait Gate<I: ?Sized> {
    /// Stable gate identifier, reported in violations.
    fn id(&self) -> &'static str;

    fn evaluate(&self, input: &I) -> Result<(), GateViolation>;
}

/// Ordered list of gates; every gate must pass.
pub struct GatePipeline<'g, I: ?Sized> {
    gates: Vec<&'g dyn Gate<I>>,
}

impl<'g, I: ?Sized> GatePipeline<'g, I> {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    /// Append a gate; gates run in insertion order.
    pub fn then(mut self, gate: &'g dyn Gate<I>) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.id()).collect()
    }

    /// Evaluate every gate in order; the first failure aborts evaluation.
    pub fn evaluate(&self, input: &I) -> Result<(), GateViolation> {
        for gate in &self.gates {
            if let Err(violation) = gate.evaluate(input) {
                debug!(
                    gate = gate.id(),
                    reason_code = %violation.reason_code,
                    "gate rejected command"
                );
                return Err(violation);
            }
        }
        Ok(())
    }
}

impl<I: ?Sized> Default for GatePipeline<'_, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Threshold {
        id: &'static str,
        max: i64,
        seen: RefCell<Vec<&'static str>>,
    }

    impl Gate<i64> for Threshold {
        fn id(&self) -> &'static str {
            self.id
        }

        fn evaluate(&self, input: &i64) -> Result<(), GateViolation> {
            self.seen.borrow_mut().push(self.id);
            if *input > self.max {
                return Err(GateViolation::new(self.id, "too_large", "input exceeds max")
                    .with_evidence("max", Decimal::from(self.max))
                    .with_evidence("input", Decimal::from(*input)));
            }
            Ok(())
        }
    }

    fn gate(id: &'static str, max: i64) -> Threshold {
        Threshold {
            id,
            max,
            seen: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn first_failing_gate_stops_evaluation() {
        let a = gate("a", 100);
        let b = gate("b", 10);
        let c = gate("c", 1);
        let pipeline = GatePipeline::<i64>::new().then(&a).then(&b).then(&c);

        let violation = pipeline.evaluate(&50).unwrap_err();
        assert_eq!(violation.gate, "b");
        assert_eq!(violation.evidence("max"), Some(Decimal::from(10)));
        assert_eq!(violation.evidence("input"), Some(Decimal::from(50)));
        assert!(c.seen.borrow().is_empty());
    }

    #[test]
    fn all_gates_pass() {
        let a = gate("a", 100);
        let b = gate("b", 100);
        let pipeline = GatePipeline::<i64>::new().then(&a).then(&b);
        assert!(pipeline.evaluate(&5).is_ok());
        assert_eq!(pipeline.ids(), vec!["a", "b"]);
    }

    #[test]
    fn violation_serializes_with_stable_codes() {
        let v = GateViolation::new("step_size", "step_size_exceeded", "too big")
            .with_subject("item-a")
            .with_evidence("max_percent", Decimal::new(5, 2));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["gate"], "step_size");
        assert_eq!(json["reason_code"], "step_size_exceeded");
        assert_eq!(json["evidence"]["max_percent"], "0.05");
    }
}
