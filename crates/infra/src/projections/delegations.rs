//! Delegations read model: every granted edge with its revocation state.
//!
//! Activity is evaluated at query time against a caller-supplied `now`, so the
//! stored state never depends on a clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use polity_core::{ActorId, DelegationId};
use polity_delegation::{Delegation, DelegationEvent, DelegationGraph};
use polity_events::{DecodeEvent, EventEnvelope, Projection};

use super::decode::GovernanceEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelegationsProjection {
    delegations: BTreeMap<DelegationId, Delegation>,
}

impl DelegationsProjection {
    pub fn get(&self, id: DelegationId) -> Option<&Delegation> {
        self.delegations.get(&id)
    }

    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Delegation> {
        self.delegations.values().filter(move |d| d.is_active(now))
    }

    /// `(grantor, grantee)` for every active delegation.
    pub fn active_edges(&self, now: DateTime<Utc>) -> Vec<(ActorId, ActorId)> {
        self.active(now).map(|d| (d.grantor, d.grantee)).collect()
    }

    pub fn graph(&self, now: DateTime<Utc>) -> DelegationGraph {
        DelegationGraph::from_edges(self.active_edges(now))
    }

    /// Whether `actor` holds `principal`'s authority in `scope` at `now`.
    ///
    /// True when they are the same actor, or when a chain of active
    /// delegations leads from `principal` to `actor` and every edge on it
    /// covers `scope`.
    pub fn holds_authority(&self, principal: ActorId, actor: ActorId, scope: &str, now: DateTime<Utc>) -> bool {
        if principal == actor {
            return true;
        }

        let mut out: BTreeMap<ActorId, Vec<ActorId>> = BTreeMap::new();
        for d in self.active(now).filter(|d| d.covers(scope)) {
            out.entry(d.grantor).or_default().push(d.grantee);
        }

        let mut visited = BTreeSet::new();
        let mut stack = vec![principal];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for next in out.get(&node).into_iter().flatten() {
                if *next == actor {
                    return true;
                }
                stack.push(*next);
            }
        }
        false
    }
}

impl Projection for DelegationsProjection {
    type Ev = GovernanceEvent;

    fn name(&self) -> &'static str {
        "delegations"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        DelegationEvent::owns(event_type)
    }

    fn apply(&mut self, envelope: &EventEnvelope<GovernanceEvent>) {
        let GovernanceEvent::Delegation(event) = envelope.payload() else {
            return;
        };
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
    }

    fn reset(&mut self) {
        self.delegations.clear();
    }
}
