//! `polity-analytics`
//!
//! **Responsibility:** concentration analytics over the delegation graph.
//!
//! This crate is intentionally pure:
//! - It does not depend on aggregates or the event store.
//! - It does not emit events; the tick engine turns its results into reflex events.

pub mod concentration;
pub mod thresholds;

pub use concentration::{gini, in_degree, max_in_degree, top_recipient};
pub use thresholds::{Assessment, ConcentrationLevel, ThresholdError, Thresholds, assess};
