//! Authority collaborator boundary.
//!
//! Whether a caller currently holds permission in a scope is decided outside
//! the domain (infra answers it from the delegation read model). Inside a gate
//! pipeline the answer is treated like any other gate result.

use chrono::{DateTime, Utc};

use crate::gate::{Gate, GateViolation};
use crate::id::ActorId;

/// Question asked of the authority collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRequest {
    /// Who is acting (None = anonymous / system).
    pub actor: Option<ActorId>,
    /// Who owns the authority being exercised (e.g. a budget's steward).
    pub principal: ActorId,
    pub scope: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityDecision {
    Granted,
    Denied(String),
}

impl AuthorityDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorityDecision::Granted)
    }
}

pub trait Authority: Send + Sync {
    fn check(&self, request: &AuthorityRequest) -> AuthorityDecision;
}

impl<A> Authority for std::sync::Arc<A>
where
    A: Authority + ?Sized,
{
    fn check(&self, request: &AuthorityRequest) -> AuthorityDecision {
        (**self).check(request)
    }
}

/// Grants everything. Useful for domain unit tests and trusted system paths.
#[derive(Debug, Default, Copy, Clone)]
pub struct Unrestricted;

impl Authority for Unrestricted {
    fn check(&self, _request: &AuthorityRequest) -> AuthorityDecision {
        AuthorityDecision::Granted
    }
}

/// Gate adapter: builds an [`AuthorityRequest`] from the gate input and asks
/// the collaborator.
pub struct AuthorityGate<'a, F> {
    authority: &'a dyn Authority,
    request: F,
}

impl<'a, F> AuthorityGate<'a, F> {
    pub const ID: &'static str = "authority";

    pub fn new(authority: &'a dyn Authority, request: F) -> Self {
        Self { authority, request }
    }
}

impl<I, F> Gate<I> for AuthorityGate<'_, F>
where
    I: ?Sized,
    F: Fn(&I) -> AuthorityRequest,
{
    fn id(&self) -> &'static str {
        "authority"
    }

    fn evaluate(&self, input: &I) -> Result<(), GateViolation> {
        let request = (self.request)(input);
        match self.authority.check(&request) {
            AuthorityDecision::Granted => Ok(()),
            AuthorityDecision::Denied(reason) => {
                let subject = request
                    .actor
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "anonymous".to_string());
                Err(GateViolation::new(
                    "authority",
                    "authority_denied",
                    format!("no valid authority in scope '{}': {reason}", request.scope),
                )
                .with_subject(subject))
            }
        }
    }
}
