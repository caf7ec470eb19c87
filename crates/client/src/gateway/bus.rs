// Live-event fan-out with scoped subscriptions.
//
// `subscribe()` hands out an `EventSubscription` capability: only live
// subscriptions see events published after they were created, and dropping
// the handle unsubscribes it. Room switches lean on this for
// teardown-before-setup — the old context's subscription is dropped before
// the new one is stored, so an event can never be delivered into two rooms
// or into a room the user already left.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use parley_common::protocol::ServerEvent;
use tokio::sync::mpsc;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<ServerEvent>>,
}

/// Fan-out point for server events received on the live channel.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.insert(id, tx);
        EventSubscription { id, registry: Arc::downgrade(&self.registry), rx }
    }

    /// Deliver `event` to every live subscription.
    pub fn publish(&self, event: &ServerEvent) {
        self.lock().subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live claim on the bus. Dropping it unsubscribes; events published
/// after the drop never reach this receiver.
pub struct EventSubscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl EventSubscription {
    /// Next already-delivered event, if any.
    pub fn try_next(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription").field("id", &self.id).finish()
    }
}
