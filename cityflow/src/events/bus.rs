use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::events::{EventKind, FlowEvent};

/// Handler invoked for every published event of a subscribed kind.
///
/// Handlers run synchronously inside splitter and worker control flow, so
/// they must not block indefinitely.
pub type EventHandler = Arc<dyn Fn(&FlowEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    handler: EventHandler,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<Subscriber>>,
}

/// Synchronous in-process publish/subscribe channel for [`FlowEvent`]s.
///
/// `publish` invokes all subscribers registered for the event's kind in
/// subscription order, on the publisher's own task. The subscriber list is
/// snapshotted before delivery, so handlers may subscribe or unsubscribe
/// while an event is being delivered; such changes take effect from the next
/// publication.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the subscriber table, recovering the data from a poisoned lock.
    ///
    /// Handlers run outside the lock, so a panic inside a handler can never
    /// leave the table in a partially updated state.
    fn locked(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriberId
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        let mut inner = self.locked();

        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.entry(kind).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });

        id
    }

    /// Removes a previously registered handler.
    ///
    /// Returns false if the id was not subscribed for that kind.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriberId) -> bool {
        let mut inner = self.locked();

        let Some(subscribers) = inner.subscribers.get_mut(&kind) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);

        before != subscribers.len()
    }

    /// Publishes an event to all current subscribers of its kind.
    pub fn publish(&self, event: FlowEvent) {
        let handlers: Vec<EventHandler> = {
            let inner = self.locked();

            inner
                .subscribers
                .get(&event.kind())
                .map(|subscribers| {
                    subscribers
                        .iter()
                        .map(|subscriber| subscriber.handler.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for handler in handlers {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEvent;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn progress(completed: u64) -> FlowEvent {
        FlowEvent::Progress(ProgressEvent { completed })
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(EventKind::Progress, move |_| {
                order.lock().unwrap().push(label);
            });
        }

        bus.publish(progress(1));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_kind_is_delivered() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicU64::new(0));

        let counted = delivered.clone();
        bus.subscribe(EventKind::Interrupt, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(progress(1));

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicU64::new(0));

        let counted = delivered.clone();
        let id = bus.subscribe(EventKind::Progress, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(progress(1));
        assert!(bus.unsubscribe(EventKind::Progress, id));
        assert!(!bus.unsubscribe(EventKind::Progress, id));
        bus.publish(progress(1));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_may_subscribe_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let late_deliveries = Arc::new(AtomicU64::new(0));

        let reentrant_bus = bus.clone();
        let late = late_deliveries.clone();
        bus.subscribe(EventKind::Progress, move |_| {
            let late = late.clone();
            reentrant_bus.subscribe(EventKind::Progress, move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The handler registered during delivery must not see the event that
        // triggered its registration.
        bus.publish(progress(1));
        assert_eq!(late_deliveries.load(Ordering::SeqCst), 0);

        bus.publish(progress(2));
        assert_eq!(late_deliveries.load(Ordering::SeqCst), 1);
    }
}
