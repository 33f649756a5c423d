//! `polity-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the aggregate contract, gate pipeline mechanics, the time source
//! and the authority collaborator boundary.

pub mod aggregate;
pub mod authority;
pub mod clock;
pub mod error;
pub mod gate;
pub mod id;
pub mod stream;

pub use aggregate::{Aggregate, AggregateRoot, CommandContext};
pub use authority::{Authority, AuthorityDecision, AuthorityGate, AuthorityRequest, Unrestricted};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use gate::{Gate, GatePipeline, GateViolation};
pub use id::{ActorId, BudgetId, CommandId, DelegationId, EventId, MandateId, TickId};
pub use stream::StreamId;

/// Exact decimal used for every money-like quantity.
pub use rust_decimal::Decimal;
