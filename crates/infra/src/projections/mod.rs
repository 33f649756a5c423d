//! Projection implementations (read model builders).
//!
//! Projections consume decoded governance events and build query-friendly
//! read models. All projections are:
//! - **Rebuildable**: reset and replayed from the event log at any time
//! - **Deterministic**: `BTreeMap`-backed, so serialized state is byte-stable
//! - **Clock-free**: time-dependent questions take `now` as an argument

pub mod budgets;
pub mod decode;
pub mod delegations;
pub mod denials;
pub mod engine;
pub mod health;
pub mod mandates;

pub use budgets::{BudgetView, BudgetsProjection, ItemView};
pub use decode::{GovernanceEvent, governance_registry};
pub use delegations::DelegationsProjection;
pub use denials::{DenialRecord, DenialsProjection};
pub use engine::{ProjectionEngine, ProjectionEngineError, REPLAY_PAGE_SIZE};
pub use health::{AlarmSummary, SystemHealthProjection, TickSummary};
pub use mandates::{MandateReviewState, MandateView, MandatesProjection};
