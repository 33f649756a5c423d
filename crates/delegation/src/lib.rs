//! Delegation registry (event-sourced) and the delegation graph.
//!
//! Delegations are directed, scoped, expiring edges between actors. The
//! registry refuses any grant that would close a cycle among active edges.

pub mod graph;
pub mod registry;

pub use graph::DelegationGraph;
pub use registry::{
    AcyclicityGate, Delegation, DelegationCommand, DelegationEvent, DelegationGranted, DelegationPolicy,
    DelegationRegistry, DelegationRevoked, GrantCheck, GrantDelegation, RevokeDelegation, STREAM_ID,
    STREAM_TYPE, SelfDelegationGate, TtlGate, WILDCARD_SCOPE, registry_stream,
};
