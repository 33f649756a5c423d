//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth.
//! This module provides deterministic replay and chronological cursor
//! tracking without making storage assumptions.

use chrono::{DateTime, Utc};
use thiserror::Error;

use polity_core::EventId;

use crate::{EventEnvelope, Projection};

/// Position of the last event a projection has seen, in replay order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectionCursor {
    occurred_at: DateTime<Utc>,
    event_id: EventId,
}

impl ProjectionCursor {
    pub fn new(occurred_at: DateTime<Utc>, event_id: EventId) -> Self {
        Self {
            occurred_at,
            event_id,
        }
    }

    pub fn of<E>(envelope: &EventEnvelope<E>) -> Self {
        Self::new(envelope.occurred_at(), envelope.event_id())
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("non-monotonic replay: last applied {last:?}, found {found:?}")]
    NonMonotonicSequence {
        last: ProjectionCursor,
        found: ProjectionCursor,
    },
}

/// Runs envelopes through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
    applied: u64,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
            applied: 0,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Last event seen (applied or skipped as uninteresting).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Number of events actually applied to the projection.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Apply a single envelope, enforcing strictly increasing replay order.
    ///
    /// Events the projection is not interested in still advance the cursor.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ProjectionError> {
        let found = ProjectionCursor::of(envelope);
        if let Some(last) = self.cursor {
            if found <= last {
                return Err(ProjectionError::NonMonotonicSequence { last, found });
            }
        }

        if self.projection.interested_in(envelope.event_type()) {
            self.projection.apply(envelope);
            self.applied += 1;
        }
        self.cursor = Some(found);
        Ok(())
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Reset the projection and forget the cursor.
    pub fn reset(&mut self) {
        self.projection.reset();
        self.cursor = None;
        self.applied = 0;
    }

    /// Rebuild a projection from scratch by replaying the full event history.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}
