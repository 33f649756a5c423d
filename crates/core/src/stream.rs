//! Stream identifiers.
//!
//! A stream is implicit: the ordered subsequence of events sharing a `StreamId`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an event stream (one aggregate instance, or a reserved stream).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Reserved stream owned by the tick engine.
    pub const SYSTEM_TICKS: &'static str = "system.ticks";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Conventional `<prefix>-<uuid>` id for an entity stream.
    pub fn for_entity(prefix: &str, id: Uuid) -> Self {
        Self(format!("{prefix}-{id}"))
    }

    pub fn system_ticks() -> Self {
        Self(Self::SYSTEM_TICKS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0.starts_with("system.")
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
