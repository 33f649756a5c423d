use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concentration::{gini, max_in_degree, top_recipient};

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("thresholds must satisfy 0 <= warn < halt <= 1 (warn={warn}, halt={halt})")]
    OutOfOrder { warn: f64, halt: f64 },
}

/// Two-tier Gini thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Thresholds {
    warn: f64,
    halt: f64,
}

impl Thresholds {
    pub fn new(warn: f64, halt: f64) -> Result<Self, ThresholdError> {
        let ordered = warn.is_finite() && halt.is_finite() && 0.0 <= warn && warn < halt && halt <= 1.0;
        if !ordered {
            return Err(ThresholdError::OutOfOrder { warn, halt });
        }
        Ok(Self { warn, halt })
    }

    pub fn warn(&self) -> f64 {
        self.warn
    }

    pub fn halt(&self) -> f64 {
        self.halt
    }

    /// Halt strictly dominates warn.
    pub fn level(&self, gini: f64) -> ConcentrationLevel {
        if gini >= self.halt {
            ConcentrationLevel::Halt
        } else if gini >= self.warn {
            ConcentrationLevel::Warning
        } else {
            ConcentrationLevel::Normal
        }
    }

    /// The threshold that `level` crossed, if any.
    pub fn crossed(&self, level: ConcentrationLevel) -> Option<f64> {
        match level {
            ConcentrationLevel::Normal => None,
            ConcentrationLevel::Warning => Some(self.warn),
            ConcentrationLevel::Halt => Some(self.halt),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { warn: 0.5, halt: 0.7 }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationLevel {
    Normal,
    Warning,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment<K> {
    pub gini: f64,
    pub max_in_degree: u64,
    pub top_recipient: Option<K>,
    pub level: ConcentrationLevel,
}

pub fn assess<K>(degrees: &BTreeMap<K, u64>, thresholds: &Thresholds) -> Assessment<K>
where
    K: Clone,
{
    let values: Vec<u64> = degrees.values().copied().collect();
    let g = gini(&values);
    Assessment {
        gini: g,
        max_in_degree: max_in_degree(degrees),
        top_recipient: top_recipient(degrees).cloned(),
        level: thresholds.level(g),
    }
}
