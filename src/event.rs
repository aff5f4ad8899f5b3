//! Typed event bus
//!
//! Every object that emits events owns an `EventBus`. Subscribers are kept
//! per event type, in subscription order, and are invoked synchronously with
//! an immutable reference to the event value.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Stable handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Box<dyn FnMut(&E) + Send>;

struct Subscriber {
    id: SubscriptionId,
    /// Holds a `Callback<E>` for the event type this list is keyed by
    callback: Box<dyn Any + Send>,
}

/// Mapping from event type to its ordered subscriber list
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<TypeId, Vec<Subscriber>>,
    next_id: u64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to events of type `E`
    pub fn subscribe<E, F>(&mut self, callback: F) -> SubscriptionId
    where
        E: 'static,
        F: FnMut(&E) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let callback: Callback<E> = Box::new(callback);

        self.subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber {
                id,
                callback: Box::new(callback),
            });

        id
    }

    /// Remove a subscription. Returns false if the handle is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.subscribers.values_mut() {
            if let Some(index) = list.iter().position(|s| s.id == id) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    /// Invoke every subscriber of `E` with the event
    pub fn notify<E: 'static>(&mut self, event: &E) {
        let Some(list) = self.subscribers.get_mut(&TypeId::of::<E>()) else {
            return;
        };

        for subscriber in list.iter_mut() {
            if let Some(callback) = subscriber.callback.downcast_mut::<Callback<E>>() {
                callback(event);
            }
        }
    }

    /// Number of subscribers currently attached to `E`
    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.subscribers
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.subscribers.len())
            .finish()
    }
}
