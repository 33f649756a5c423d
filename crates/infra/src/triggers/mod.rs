//! Time-driven triggers: the tick engine and its background runner.

pub mod events;
pub mod runner;
pub mod tick;

pub use events::{
    ConcentrationAlarm, EscalationRaised, ReviewTriggered, STREAM_TYPE, SystemEvent, TickRecorded, system_stream,
};
pub use runner::{TickRunner, TickRunnerHandle};
pub use tick::{MARKER_ATTEMPTS, Reflex, TickEngine, TickError, TickReport, plan_reflexes};
