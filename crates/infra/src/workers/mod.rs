//! Background workers consuming the event bus.

pub mod subscriber_worker;

pub use subscriber_worker::{SubscriberWorker, WorkerHandle};
