use polity_core::{Aggregate, CommandContext};

/// Execute an aggregate command deterministically (no IO).
///
/// Decide with `handle`, then evolve the aggregate with `apply` for each
/// emitted event. The full pipeline with persistence and optimistic
/// concurrency lives in the infra command dispatcher.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
    ctx: &CommandContext<'_>,
) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = A::handle(aggregate, command, ctx)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
