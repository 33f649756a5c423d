//! Mandates read model, including the review state set by the tick engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use polity_core::{ActorId, MandateId};
use polity_events::{DecodeEvent, EventEnvelope, Projection};
use polity_mandates::MandateEvent;

use super::decode::GovernanceEvent;
use crate::triggers::events::SystemEvent;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateReviewState {
    Active,
    UnderReview,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MandateView {
    pub mandate_id: MandateId,
    pub title: String,
    pub holder: ActorId,
    pub review_interval_days: u32,
    pub state: MandateReviewState,
    pub next_checkpoint_at: DateTime<Utc>,
    pub reviews_completed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MandatesProjection {
    mandates: BTreeMap<MandateId, MandateView>,
}

impl MandatesProjection {
    pub fn get(&self, id: MandateId) -> Option<&MandateView> {
        self.mandates.get(&id)
    }

    /// Mandates that are not retired (active or under review).
    pub fn active_count(&self) -> usize {
        self.mandates
            .values()
            .filter(|m| m.state != MandateReviewState::Retired)
            .count()
    }

    /// Active mandates whose checkpoint has passed. Mandates already under
    /// review are excluded.
    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<&MandateView> {
        self.mandates
            .values()
            .filter(|m| m.state == MandateReviewState::Active && m.next_checkpoint_at < now)
            .collect()
    }
}

impl Projection for MandatesProjection {
    type Ev = GovernanceEvent;

    fn name(&self) -> &'static str {
        "mandates"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        MandateEvent::owns(event_type) || event_type == SystemEvent::REVIEW_TRIGGERED
    }

    fn apply(&mut self, envelope: &EventEnvelope<GovernanceEvent>) {
        match envelope.payload() {
            GovernanceEvent::Mandate(MandateEvent::Chartered(e)) => {
                self.mandates.insert(
                    e.mandate_id,
                    MandateView {
                        mandate_id: e.mandate_id,
                        title: e.title.clone(),
                        holder: e.holder,
                        review_interval_days: e.review_interval_days,
                        state: MandateReviewState::Active,
                        next_checkpoint_at: e.next_checkpoint_at,
                        reviews_completed: 0,
                    },
                );
            }
            GovernanceEvent::Mandate(MandateEvent::ReviewCompleted(e)) => {
                if let Some(m) = self.mandates.get_mut(&e.mandate_id) {
                    if m.state != MandateReviewState::Retired {
                        m.state = MandateReviewState::Active;
                    }
                    m.next_checkpoint_at = e.next_checkpoint_at;
                    m.reviews_completed += 1;
                }
            }
            GovernanceEvent::Mandate(MandateEvent::Retired(e)) => {
                if let Some(m) = self.mandates.get_mut(&e.mandate_id) {
                    m.state = MandateReviewState::Retired;
                }
            }
            GovernanceEvent::System(SystemEvent::ReviewTriggered(e)) => {
                if let Some(m) = self.mandates.get_mut(&e.mandate_id) {
                    if m.state == MandateReviewState::Active {
                        m.state = MandateReviewState::UnderReview;
                    }
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.mandates.clear();
    }
}
