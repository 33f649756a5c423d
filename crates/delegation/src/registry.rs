use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use polity_core::{
    ActorId, Aggregate, AggregateRoot, AuthorityGate, AuthorityRequest, CommandContext, DelegationId,
    DomainError, Gate, GatePipeline, GateViolation, StreamId,
};
use polity_events::{Command, DecodeEvent, Event, SchemaError, decode_payload, encode_payload};

use crate::graph::DelegationGraph;

/// All delegations live on one registry stream so the acyclicity check sees
/// one consistent graph.
pub const STREAM_ID: &str = "delegations";
pub const STREAM_TYPE: &str = "delegation_registry";

/// Scope that matches every requested scope.
pub const WILDCARD_SCOPE: &str = "*";

pub fn registry_stream() -> StreamId {
    StreamId::new(STREAM_ID)
}

/// Limits applied to new grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationPolicy {
    pub max_ttl: Duration,
}

impl DelegationPolicy {
    pub fn with_max_ttl_days(days: i64) -> Self {
        Self {
            max_ttl: Duration::days(days),
        }
    }
}

impl Default for DelegationPolicy {
    fn default() -> Self {
        Self::with_max_ttl_days(365)
    }
}

/// One delegation edge: `grantor` lends authority in `scope` to `grantee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub grantor: ActorId,
    pub grantee: ActorId,
    pub scope: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Delegation {
    /// Granted, not yet expired and not revoked at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.granted_at <= now && now < self.expires_at
    }

    pub fn covers(&self, scope: &str) -> bool {
        self.scope == scope || self.scope == WILDCARD_SCOPE
    }
}

/// Command: GrantDelegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDelegation {
    pub delegation_id: DelegationId,
    pub grantor: ActorId,
    pub grantee: ActorId,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

/// Command: RevokeDelegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeDelegation {
    pub delegation_id: DelegationId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationCommand {
    Grant(GrantDelegation),
    Revoke(RevokeDelegation),
}

impl Command for DelegationCommand {
    fn target_stream(&self) -> StreamId {
        registry_stream()
    }

    fn command_type(&self) -> &'static str {
        match self {
            DelegationCommand::Grant(_) => "delegation.grant",
            DelegationCommand::Revoke(_) => "delegation.revoke",
        }
    }
}

/// Event: DelegationGranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationGranted {
    pub delegation_id: DelegationId,
    pub grantor: ActorId,
    pub grantee: ActorId,
    pub scope: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Event: DelegationRevoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRevoked {
    pub delegation_id: DelegationId,
    #[serde(default)]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationEvent {
    Granted(DelegationGranted),
    Revoked(DelegationRevoked),
}

impl DelegationEvent {
    pub const GRANTED: &'static str = "delegation.granted";
    pub const REVOKED: &'static str = "delegation.revoked";
}

impl Event for DelegationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DelegationEvent::Granted(_) => Self::GRANTED,
            DelegationEvent::Revoked(_) => Self::REVOKED,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DelegationEvent::Granted(e) => e.granted_at,
            DelegationEvent::Revoked(e) => e.occurred_at,
        }
    }
}

impl DecodeEvent for DelegationEvent {
    fn schema() -> &'static [(&'static str, u32)] {
        &[(DelegationEvent::GRANTED, 1), (DelegationEvent::REVOKED, 1)]
    }

    fn decode(event_type: &str, _schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
        match event_type {
            Self::GRANTED => Ok(DelegationEvent::Granted(decode_payload(event_type, payload)?)),
            Self::REVOKED => Ok(DelegationEvent::Revoked(decode_payload(event_type, payload)?)),
            other => Err(SchemaError::UnknownEventType(other.to_string())),
        }
    }

    fn encode(&self) -> Result<JsonValue, SchemaError> {
        match self {
            DelegationEvent::Granted(e) => encode_payload(Self::GRANTED, e),
            DelegationEvent::Revoked(e) => encode_payload(Self::REVOKED, e),
        }
    }
}

/// Snapshot the grant gates evaluate.
#[derive(Debug, Clone)]
pub struct GrantCheck {
    pub grantor: ActorId,
    pub grantee: ActorId,
    pub scope: String,
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Active edges at `now`.
    pub graph: DelegationGraph,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SelfDelegationGate;

impl Gate<GrantCheck> for SelfDelegationGate {
    fn id(&self) -> &'static str {
        "self_delegation"
    }

    fn evaluate(&self, input: &GrantCheck) -> Result<(), GateViolation> {
        if input.grantor != input.grantee {
            return Ok(());
        }
        Err(GateViolation::new(self.id(), "self_delegation", "an actor cannot delegate to itself")
            .with_subject(input.grantor.to_string()))
    }
}

/// `now < expires_at <= now + max_ttl`.
#[derive(Debug, Copy, Clone)]
pub struct TtlGate {
    pub max_ttl: Duration,
}

impl Gate<GrantCheck> for TtlGate {
    fn id(&self) -> &'static str {
        "ttl"
    }

    fn evaluate(&self, input: &GrantCheck) -> Result<(), GateViolation> {
        let ttl = input.expires_at - input.now;
        let ttl_days = Decimal::new(ttl.num_seconds(), 0) / Decimal::from(86_400);
        let max_days = Decimal::from(self.max_ttl.num_days());

        if input.expires_at <= input.now {
            return Err(GateViolation::new(self.id(), "already_expired", "expiry must lie in the future")
                .with_evidence("ttl_days", ttl_days)
                .with_evidence("max_ttl_days", max_days));
        }
        if ttl > self.max_ttl {
            return Err(GateViolation::new(
                self.id(),
                "ttl_exceeded",
                format!("delegation lifetime exceeds {} days", self.max_ttl.num_days()),
            )
            .with_evidence("ttl_days", ttl_days)
            .with_evidence("max_ttl_days", max_days));
        }
        Ok(())
    }
}

/// Rejects `grantor -> grantee` when `grantee` already reaches `grantor`.
#[derive(Debug, Default, Copy, Clone)]
pub struct AcyclicityGate;

impl Gate<GrantCheck> for AcyclicityGate {
    fn id(&self) -> &'static str {
        "acyclicity"
    }

    fn evaluate(&self, input: &GrantCheck) -> Result<(), GateViolation> {
        if !input.graph.would_create_cycle(input.grantor, input.grantee) {
            return Ok(());
        }
        Err(GateViolation::new(
            self.id(),
            "cycle_detected",
            format!("{} already reaches {} through active delegations", input.grantee, input.grantor),
        )
        .with_subject(input.grantee.to_string())
        .with_evidence("active_edges", Decimal::from(input.graph.edge_count() as u64)))
    }
}

/// Aggregate root: the delegation registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRegistry {
    id: StreamId,
    policy: DelegationPolicy,
    delegations: BTreeMap<DelegationId, Delegation>,
    version: u64,
}

impl DelegationRegistry {
    pub fn empty(policy: DelegationPolicy) -> Self {
        Self {
            id: registry_stream(),
            policy,
            delegations: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn get(&self, id: DelegationId) -> Option<&Delegation> {
        self.delegations.get(&id)
    }

    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Delegation> {
        self.delegations.values().filter(move |d| d.is_active(now))
    }

    pub fn active_graph(&self, now: DateTime<Utc>) -> DelegationGraph {
        DelegationGraph::from_edges(self.active(now).map(|d| (d.grantor, d.grantee)))
    }
}

impl AggregateRoot for DelegationRegistry {
    type Id = StreamId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for DelegationRegistry {
    type Command = DelegationCommand;
    type Event = DelegationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DelegationEvent::Granted(e) => {
                self.delegations.insert(
                    e.delegation_id,
                    Delegation {
                        id: e.delegation_id,
                        grantor: e.grantor,
                        grantee: e.grantee,
                        scope: e.scope.clone(),
                        granted_at: e.granted_at,
                        expires_at: e.expires_at,
                        revoked_at: None,
                    },
                );
            }
            DelegationEvent::Revoked(e) => {
                if let Some(d) = self.delegations.get_mut(&e.delegation_id) {
                    d.revoked_at = Some(e.occurred_at);
                }
            }
        }
        self.version += 1;
    }

    fn handle(
        &self,
        command: &Self::Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DelegationCommand::Grant(cmd) => self.handle_grant(cmd, ctx),
            DelegationCommand::Revoke(cmd) => self.handle_revoke(cmd, ctx),
        }
    }
}

impl DelegationRegistry {
    fn handle_grant(&self, cmd: &GrantDelegation, ctx: &CommandContext<'_>) -> Result<Vec<DelegationEvent>, DomainError> {
        if self.delegations.contains_key(&cmd.delegation_id) {
            return Err(DomainError::conflict(format!("delegation {} already exists", cmd.delegation_id)));
        }
        if cmd.scope.trim().is_empty() {
            return Err(DomainError::validation("scope cannot be empty"));
        }

        let check = GrantCheck {
            grantor: cmd.grantor,
            grantee: cmd.grantee,
            scope: cmd.scope.clone(),
            now: ctx.now,
            expires_at: cmd.expires_at,
            graph: self.active_graph(ctx.now),
        };

        let ttl = TtlGate {
            max_ttl: self.policy.max_ttl,
        };
        let authority = AuthorityGate::new(ctx.authority, |c: &GrantCheck| AuthorityRequest {
            actor: ctx.actor,
            principal: c.grantor,
            scope: c.scope.clone(),
            at: c.now,
        });
        GatePipeline::<GrantCheck>::new()
            .then(&SelfDelegationGate)
            .then(&ttl)
            .then(&authority)
            .then(&AcyclicityGate)
            .evaluate(&check)?;

        Ok(vec![DelegationEvent::Granted(DelegationGranted {
            delegation_id: cmd.delegation_id,
            grantor: cmd.grantor,
            grantee: cmd.grantee,
            scope: cmd.scope.clone(),
            granted_at: ctx.now,
            expires_at: cmd.expires_at,
        })])
    }

    fn handle_revoke(&self, cmd: &RevokeDelegation, ctx: &CommandContext<'_>) -> Result<Vec<DelegationEvent>, DomainError> {
        let delegation = self
            .delegations
            .get(&cmd.delegation_id)
            .ok_or_else(|| DomainError::not_found(format!("delegation {}", cmd.delegation_id)))?;
        if delegation.revoked_at.is_some() {
            return Err(DomainError::conflict(format!("delegation {} already revoked", cmd.delegation_id)));
        }

        let request = AuthorityRequest {
            actor: ctx.actor,
            principal: delegation.grantor,
            scope: delegation.scope.clone(),
            at: ctx.now,
        };
        let authority = AuthorityGate::new(ctx.authority, move |_: &()| request.clone());
        GatePipeline::<()>::new().then(&authority).evaluate(&())?;

        Ok(vec![DelegationEvent::Revoked(DelegationRevoked {
            delegation_id: cmd.delegation_id,
            reason: cmd.reason.clone(),
            occurred_at: ctx.now,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polity_core::{Authority, AuthorityDecision, Unrestricted};
    use polity_events::execute;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn ctx(actor: Option<ActorId>) -> CommandContext<'static> {
        CommandContext::new(test_time(), actor, &Unrestricted)
    }

    fn grant(grantor: ActorId, grantee: ActorId, days: i64) -> DelegationCommand {
        DelegationCommand::Grant(GrantDelegation {
            delegation_id: DelegationId::new(),
            grantor,
            grantee,
            scope: "budget:parks".to_string(),
            expires_at: test_time() + Duration::days(days),
        })
    }

    fn rejected_gate(err: DomainError) -> String {
        match err {
            DomainError::Rejected(v) => v.gate,
            other => panic!("Expected gate rejection, got {other:?}"),
        }
    }

    #[test]
    fn grant_records_edge() {
        let (a, b) = (ActorId::new(), ActorId::new());
        let mut registry = DelegationRegistry::empty(DelegationPolicy::default());
        let events = execute(&mut registry, &grant(a, b, 30), &ctx(Some(a))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(registry.active(test_time()).count(), 1);
        assert!(registry.active_graph(test_time()).reaches(a, b));
        assert_eq!(registry.active(test_time() + Duration::days(31)).count(), 0);
    }

    #[test]
    fn self_delegation_is_first_gate() {
        let a = ActorId::new();
        let registry = DelegationRegistry::empty(DelegationPolicy::default());
        let err = registry.handle(&grant(a, a, 10_000), &ctx(Some(a))).unwrap_err();
        assert_eq!(rejected_gate(err), "self_delegation");
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let (a, b) = (ActorId::new(), ActorId::new());
        let registry = DelegationRegistry::empty(DelegationPolicy::with_max_ttl_days(90));
        assert_eq!(rejected_gate(registry.handle(&grant(a, b, 91), &ctx(Some(a))).unwrap_err()), "ttl");
        assert_eq!(rejected_gate(registry.handle(&grant(a, b, 0), &ctx(Some(a))).unwrap_err()), "ttl");
        assert!(registry.handle(&grant(a, b, 90), &ctx(Some(a))).is_ok());
    }

    #[test]
    fn authority_is_checked_against_grantor() {
        struct GrantorOnly;
        impl Authority for GrantorOnly {
            fn check(&self, request: &AuthorityRequest) -> AuthorityDecision {
                if request.actor == Some(request.principal) {
                    AuthorityDecision::Granted
                } else {
                    AuthorityDecision::Denied("not the grantor".to_string())
                }
            }
        }

        let (a, b) = (ActorId::new(), ActorId::new());
        let registry = DelegationRegistry::empty(DelegationPolicy::default());
        let strict = CommandContext::new(test_time(), Some(b), &GrantorOnly);
        assert_eq!(rejected_gate(registry.handle(&grant(a, b, 10), &strict).unwrap_err()), "authority");
    }

    #[test]
    fn closing_a_cycle_is_rejected() {
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        let mut registry = DelegationRegistry::empty(DelegationPolicy::default());
        execute(&mut registry, &grant(a, b, 30), &ctx(None)).unwrap();
        execute(&mut registry, &grant(b, c, 30), &ctx(None)).unwrap();

        let err = registry.handle(&grant(c, a, 30), &ctx(None)).unwrap_err();
        match err {
            DomainError::Rejected(v) => {
                assert_eq!(v.gate, "acyclicity");
                assert_eq!(v.reason_code, "cycle_detected");
                assert_eq!(v.evidence("active_edges"), Some(Decimal::from(2)));
            }
            other => panic!("Expected acyclicity rejection, got {other:?}"),
        }
    }

    #[test]
    fn revoked_edges_no_longer_block() {
        let (a, b) = (ActorId::new(), ActorId::new());
        let mut registry = DelegationRegistry::empty(DelegationPolicy::default());
        let first = grant(a, b, 30);
        let DelegationCommand::Grant(g) = &first else {
            panic!("Expected grant");
        };
        let id = g.delegation_id;
        execute(&mut registry, &first, &ctx(None)).unwrap();
        assert!(registry.handle(&grant(b, a, 30), &ctx(None)).is_err());

        let revoke = DelegationCommand::Revoke(RevokeDelegation {
            delegation_id: id,
            reason: Some("rotation".to_string()),
        });
        execute(&mut registry, &revoke, &ctx(None)).unwrap();
        assert!(registry.handle(&grant(b, a, 30), &ctx(None)).is_ok());

        let err = registry.handle(&revoke, &ctx(None)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn revoking_unknown_delegation_is_not_found() {
        let registry = DelegationRegistry::empty(DelegationPolicy::default());
        let err = registry
            .handle(
                &DelegationCommand::Revoke(RevokeDelegation {
                    delegation_id: DelegationId::new(),
                    reason: None,
                }),
                &ctx(None),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of accepted grants produces a cycle among
        /// active edges.
        #[test]
        fn accepted_grants_never_form_cycles(
            proposals in prop::collection::vec((0usize..6, 0usize..6), 1..40)
        ) {
            let actors: Vec<ActorId> = (0..6).map(|_| ActorId::new()).collect();
            let mut registry = DelegationRegistry::empty(DelegationPolicy::default());
            for (from, to) in proposals {
                let _ = execute(&mut registry, &grant(actors[from], actors[to], 30), &ctx(None));
            }
            prop_assert!(registry.active_graph(test_time()).find_cycles().is_empty());
        }
    }
}
