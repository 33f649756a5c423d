//! Domain error model.

use thiserror::Error;

use crate::gate::GateViolation;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// gate violations, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An ordered gate rejected the command; carries the gate id and evidence.
    #[error("rejected by gate '{}': {}", .0.gate, .0.message)]
    Rejected(GateViolation),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced stream/entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The aggregate is in a state that does not accept the command.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The violation behind a gate rejection, if this is one.
    pub fn violation(&self) -> Option<&GateViolation> {
        match self {
            Self::Rejected(v) => Some(v),
            _ => None,
        }
    }
}

impl From<GateViolation> for DomainError {
    fn from(value: GateViolation) -> Self {
        Self::Rejected(value)
    }
}
