//! Event and command model, typed decoding, projections and the event bus.
//!
//! Nothing in this crate performs IO. Storage lives in `polity-infra`.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod runner;
pub mod schema;

pub use bus::{EventBus, Routable, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
pub use schema::{DecodeEvent, SchemaError, SchemaRegistry, decode_payload, encode_payload};
