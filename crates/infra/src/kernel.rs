//! Kernel façade: the single entry point for external callers.
//!
//! Wires the event store, the command dispatcher, the projection engine, the
//! clock and the configured policies together. Every command goes through the
//! dispatcher with authority answered from the delegations read model; events
//! the command commits are then applied to the projections before returning.

use std::io;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use polity_core::{
    ActorId, Aggregate, Authority, AuthorityDecision, AuthorityRequest, BudgetId, Clock, CommandContext, CommandId,
    DomainError, MandateId, TickId,
};
use polity_budget::{
    ActivateBudget, AdjustAllocations, Budget, BudgetCommand, CloseBudget, CreateBudget, RecordExpenditure,
    StepSizePolicy,
};
use polity_delegation::{DelegationCommand, DelegationPolicy, DelegationRegistry, GrantDelegation, RevokeDelegation};
use polity_events::{Command, DecodeEvent, Event};
use polity_mandates::{CharterMandate, CompleteReview, Mandate, MandateCommand, RetireMandate};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome};
use crate::config::{ConfigError, KernelConfig};
use crate::event_store::EventStore;
use crate::projections::{
    BudgetView, DelegationsProjection, DenialRecord, MandateView, ProjectionEngine, ProjectionEngineError,
    SystemHealthProjection,
};
use crate::triggers::{TickEngine, TickError, TickReport, TickRunner, TickRunnerHandle};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Projection(#[from] ProjectionEngineError),

    #[error("projection state lock poisoned")]
    Poisoned,
}

/// Authority answered from a delegations snapshot.
///
/// Granted when the actor is the principal, or when an active delegation
/// chain leads from the principal to the actor with every edge covering the
/// requested scope. An anonymous caller never holds authority.
pub struct DelegationAuthority<'a> {
    delegations: &'a DelegationsProjection,
}

impl<'a> DelegationAuthority<'a> {
    pub fn new(delegations: &'a DelegationsProjection) -> Self {
        Self { delegations }
    }
}

impl Authority for DelegationAuthority<'_> {
    fn check(&self, request: &AuthorityRequest) -> AuthorityDecision {
        let Some(actor) = request.actor else {
            return AuthorityDecision::Denied("no acting identity".to_string());
        };
        if self
            .delegations
            .holds_authority(request.principal, actor, &request.scope, request.at)
        {
            AuthorityDecision::Granted
        } else {
            AuthorityDecision::Denied(format!("no active delegation from {}", request.principal))
        }
    }
}

pub struct Kernel<S> {
    store: Arc<S>,
    dispatcher: CommandDispatcher<Arc<S>>,
    projections: Arc<RwLock<ProjectionEngine>>,
    clock: Arc<dyn Clock>,
    config: KernelConfig,
    step_size: StepSizePolicy,
    delegation_policy: DelegationPolicy,
    ticks: Arc<TickEngine<S>>,
}

impl<S> Kernel<S>
where
    S: EventStore,
{
    /// Validate `config` and rebuild projections from the store's history.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let thresholds = config.thresholds()?;

        let mut engine = ProjectionEngine::new();
        engine.rebuild(store.as_ref())?;
        let projections = Arc::new(RwLock::new(engine));

        let ticks = Arc::new(TickEngine::new(
            store.clone(),
            projections.clone(),
            clock.clone(),
            thresholds,
            config.escalation_code().map(str::to_string),
        ));

        Ok(Self {
            dispatcher: CommandDispatcher::new(store.clone()),
            step_size: config.step_size_policy(),
            delegation_policy: config.delegation_policy(),
            store,
            projections,
            clock,
            config,
            ticks,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // --- budgets ---

    pub fn create_budget(
        &self,
        cmd: CreateBudget,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.budget_id;
        self.submit_budget(id, BudgetCommand::Create(cmd), command_id, actor)
    }

    pub fn activate_budget(
        &self,
        cmd: ActivateBudget,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.budget_id;
        self.submit_budget(id, BudgetCommand::Activate(cmd), command_id, actor)
    }

    pub fn adjust_allocations(
        &self,
        cmd: AdjustAllocations,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.budget_id;
        self.submit_budget(id, BudgetCommand::AdjustAllocations(cmd), command_id, actor)
    }

    /// A gate denial is not an error here: the outcome carries a
    /// `budget.expenditure_rejected` event instead.
    pub fn request_expenditure(
        &self,
        cmd: RecordExpenditure,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.budget_id;
        self.submit_budget(id, BudgetCommand::RecordExpenditure(cmd), command_id, actor)
    }

    pub fn close_budget(
        &self,
        cmd: CloseBudget,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.budget_id;
        self.submit_budget(id, BudgetCommand::Close(cmd), command_id, actor)
    }

    // --- delegations ---

    pub fn grant_delegation(
        &self,
        cmd: GrantDelegation,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.submit_delegation(DelegationCommand::Grant(cmd), command_id, actor)
    }

    pub fn revoke_delegation(
        &self,
        cmd: RevokeDelegation,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.submit_delegation(DelegationCommand::Revoke(cmd), command_id, actor)
    }

    // --- mandates ---

    pub fn charter_mandate(
        &self,
        cmd: CharterMandate,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.mandate_id;
        self.submit_mandate(id, MandateCommand::Charter(cmd), command_id, actor)
    }

    pub fn complete_review(
        &self,
        cmd: CompleteReview,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.mandate_id;
        self.submit_mandate(id, MandateCommand::CompleteReview(cmd), command_id, actor)
    }

    pub fn retire_mandate(
        &self,
        cmd: RetireMandate,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let id = cmd.mandate_id;
        self.submit_mandate(id, MandateCommand::Retire(cmd), command_id, actor)
    }

    // --- ticks ---

    pub fn run_tick(&self, tick_id: TickId) -> Result<TickReport, TickError> {
        self.ticks.run_tick(tick_id)
    }

    /// Start the background tick thread on `runner`'s schedule.
    pub fn spawn_tick_runner(&self, runner: &TickRunner) -> io::Result<TickRunnerHandle>
    where
        S: 'static,
    {
        let ticks = self.ticks.clone();
        runner.spawn("polity-tick", move |tick_id| ticks.run_tick(tick_id))
    }

    /// Runner on the configured interval.
    pub fn tick_runner(&self) -> TickRunner {
        TickRunner::with_interval(self.config.tick.interval())
    }

    // --- projections ---

    pub fn rebuild_projections(&self) -> Result<u64, KernelError> {
        let mut engine = self.projections.write().map_err(|_| KernelError::Poisoned)?;
        Ok(engine.rebuild(self.store.as_ref())?)
    }

    /// Pick up events appended by other writers sharing the store.
    pub fn catch_up_projections(&self) -> Result<u64, KernelError> {
        let mut engine = self.projections.write().map_err(|_| KernelError::Poisoned)?;
        Ok(engine.catch_up(self.store.as_ref())?)
    }

    /// Run `f` against the current projection state.
    pub fn read_projections<T>(&self, f: impl FnOnce(&ProjectionEngine) -> T) -> Result<T, KernelError> {
        let engine = self.projections.read().map_err(|_| KernelError::Poisoned)?;
        Ok(f(&engine))
    }

    pub fn budget(&self, id: BudgetId) -> Result<Option<BudgetView>, KernelError> {
        self.read_projections(|p| p.budgets().get(id).cloned())
    }

    pub fn denials(&self, id: BudgetId) -> Result<Vec<DenialRecord>, KernelError> {
        self.read_projections(|p| p.denials().for_budget(id).to_vec())
    }

    pub fn mandate(&self, id: MandateId) -> Result<Option<MandateView>, KernelError> {
        self.read_projections(|p| p.mandates().get(id).cloned())
    }

    pub fn health(&self) -> Result<SystemHealthProjection, KernelError> {
        self.read_projections(|p| p.health().clone())
    }

    pub fn projection_state_json(&self) -> Result<String, KernelError> {
        self.read_projections(|p| p.state_json())?.map_err(KernelError::from)
    }

    /// Re-run `f` from scratch while it fails with a concurrency conflict.
    ///
    /// Each attempt reloads and re-decides; nothing is merged. Any other
    /// error, or the last conflict, is returned as-is.
    pub fn execute_with_retry<T>(
        max_attempts: u32,
        mut f: impl FnMut() -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let mut attempt = 1;
        loop {
            match f() {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, error = %err, "command conflicted; retrying from reload");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn submit_budget(
        &self,
        id: BudgetId,
        cmd: BudgetCommand,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let policy = self.step_size.clone();
        self.submit(&cmd, command_id, actor, polity_budget::STREAM_TYPE, || Budget::empty(id, policy))
    }

    fn submit_delegation(
        &self,
        cmd: DelegationCommand,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let policy = self.delegation_policy;
        self.submit(&cmd, command_id, actor, polity_delegation::STREAM_TYPE, || {
            DelegationRegistry::empty(policy)
        })
    }

    fn submit_mandate(
        &self,
        id: MandateId,
        cmd: MandateCommand,
        command_id: CommandId,
        actor: Option<ActorId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.submit(&cmd, command_id, actor, polity_mandates::STREAM_TYPE, || Mandate::empty(id))
    }

    fn submit<A>(
        &self,
        command: &A::Command,
        command_id: CommandId,
        actor: Option<ActorId>,
        stream_type: &str,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + DecodeEvent,
    {
        let now = self.clock.now();
        let outcome = {
            // Read guard held for the decision so authority sees one snapshot.
            let engine = self.projections.read().map_err(|_| DispatchError::Poisoned)?;
            let authority = DelegationAuthority::new(engine.delegations());
            let ctx = CommandContext::new(now, actor, &authority);
            self.dispatcher
                .dispatch(command, &ctx, command_id, stream_type, make_aggregate)?
        };

        if !outcome.replayed && !outcome.events.is_empty() {
            let mut engine = self.projections.write().map_err(|_| DispatchError::Poisoned)?;
            engine.apply_committed(self.store.as_ref(), &outcome.events)?;
            info!(
                command_type = command.command_type(),
                events = outcome.events.len(),
                "projections updated"
            );
        }
        Ok(outcome)
    }
}
