//! In-memory event bus for tests and single-process deployments.

use std::collections::BTreeSet;
use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Routable, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    /// `None` = every event type.
    event_types: Option<BTreeSet<String>>,
}

impl<M> Subscriber<M> {
    fn wants(&self, event_type: &str) -> bool {
        match &self.event_types {
            None => true,
            Some(types) => types.contains(event_type),
        }
    }
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out; dead subscribers are dropped on publish
/// - At-least-once acceptable (subscribers must be idempotent)
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, event_types: Option<BTreeSet<String>>) -> Subscription<M> {
        let (sender, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { sender, event_types });
        }

        Subscription::new(rx)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Routable + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        subs.retain(|sub| {
            if !sub.wants(message.event_type()) {
                return true;
            }
            sub.sender.send(message.clone()).is_ok()
        });

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.register(None)
    }

    fn subscribe_to(&self, event_types: &[&str]) -> Subscription<M> {
        self.register(Some(event_types.iter().map(|t| t.to_string()).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Msg(&'static str);

    impl Routable for Msg {
        fn event_type(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn broadcast_reaches_every_subscriber() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(Msg("budget.created")).unwrap();

        assert_eq!(a.try_recv().unwrap(), Msg("budget.created"));
        assert_eq!(b.try_recv().unwrap(), Msg("budget.created"));
    }

    #[test]
    fn filtered_subscription_only_sees_listed_types() {
        let bus = InMemoryEventBus::new();
        let audit = bus.subscribe_to(&["budget.expenditure_rejected"]);
        bus.publish(Msg("budget.created")).unwrap();
        bus.publish(Msg("budget.expenditure_rejected")).unwrap();

        assert_eq!(audit.try_recv().unwrap(), Msg("budget.expenditure_rejected"));
        assert!(audit.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(Msg("x")).unwrap();
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }
}
