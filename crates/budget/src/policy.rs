use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk/flex classification of an allocation item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlexClass {
    Rigid,
    Standard,
    Flexible,
}

impl FlexClass {
    pub const ALL: [FlexClass; 3] = [FlexClass::Rigid, FlexClass::Standard, FlexClass::Flexible];

    pub fn as_str(self) -> &'static str {
        match self {
            FlexClass::Rigid => "rigid",
            FlexClass::Standard => "standard",
            FlexClass::Flexible => "flexible",
        }
    }
}

/// Per-classification ceiling on `|change| / current_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSizePolicy {
    ceilings: BTreeMap<FlexClass, Decimal>,
}

impl StepSizePolicy {
    pub fn new(ceilings: BTreeMap<FlexClass, Decimal>) -> Self {
        Self { ceilings }
    }

    /// Ceiling for `class`. Classes missing from the table fall back to the
    /// rigid default so an incomplete table never loosens the gate.
    pub fn ceiling(&self, class: FlexClass) -> Decimal {
        self.ceilings
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_ceiling(FlexClass::Rigid))
    }

    pub fn ceilings(&self) -> &BTreeMap<FlexClass, Decimal> {
        &self.ceilings
    }
}

fn default_ceiling(class: FlexClass) -> Decimal {
    match class {
        FlexClass::Rigid => Decimal::new(5, 2),
        FlexClass::Standard => Decimal::new(15, 2),
        FlexClass::Flexible => Decimal::new(50, 2),
    }
}

impl Default for StepSizePolicy {
    /// 5% / 15% / 50%.
    fn default() -> Self {
        Self {
            ceilings: FlexClass::ALL.iter().map(|c| (*c, default_ceiling(*c))).collect(),
        }
    }
}
