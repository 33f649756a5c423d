//! Event query interface for inspection and audit.
//!
//! Queries are read-only, chronological by `(occurred_at, event_id)`, and
//! bounded by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event_store::StoredEvent;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Filter criteria for event queries. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Filter by stream type (e.g. "budget").
    pub stream_type: Option<String>,
    /// Filter by event type (e.g. "budget.expenditure_rejected").
    pub event_type: Option<String>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
    /// Defaults to 50, capped at 1000.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_type(mut self, stream_type: impl Into<String>) -> Self {
        self.stream_type = Some(stream_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.occurred_after = Some(from);
        self.occurred_before = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        if let Some(t) = &self.stream_type {
            if &event.stream_type != t {
                return false;
            }
        }
        if let Some(t) = &self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(after) = self.occurred_after {
            if event.occurred_at < after {
                return false;
            }
        }
        if let Some(before) = self.occurred_before {
            if event.occurred_at > before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_defaulted_and_capped() {
        assert_eq!(EventFilter::new().effective_limit(), 50);
        assert_eq!(EventFilter::new().limit(10).effective_limit(), 10);
        assert_eq!(EventFilter::new().limit(50_000).effective_limit(), 1000);
    }
}
