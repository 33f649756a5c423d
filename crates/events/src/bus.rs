//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes events **after** they are committed to the event store;
//! it is not storage. Delivery is at-least-once and consumers must tolerate
//! duplicates (the store remains the source of truth and can be replayed).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to a bus.
///
/// Designed for single-threaded consumption: one subscription per consumer
/// thread. Messages arrive in publish order for a single publisher.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Messages that can be routed by event type.
pub trait Routable {
    fn event_type(&self) -> &str;
}

impl<E> Routable for crate::EventEnvelope<E> {
    fn event_type(&self) -> &str {
        crate::EventEnvelope::event_type(self)
    }
}

/// Transport-agnostic pub/sub.
///
/// `subscribe` receives every message; `subscribe_to` receives only messages
/// whose event type is listed (audit or notification consumers that care about
/// specific facts).
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    fn subscribe_to(&self, event_types: &[&str]) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn subscribe_to(&self, event_types: &[&str]) -> Subscription<M> {
        (**self).subscribe_to(event_types)
    }
}
