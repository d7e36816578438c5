//! Coalesced broadcast of timer snapshots.
//!
//! Mutations only set a dirty flag; [`NotificationBus::publish`] is called
//! once per scheduling frame and sends at most one snapshot. Events such as
//! session completion are delivered immediately, once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::state::{TimerEvent, TimerSnapshot};

type SnapshotFn = Arc<dyn Fn(&TimerSnapshot) + Send + Sync>;
type EventFn = Arc<dyn Fn(&TimerEvent) + Send + Sync>;

enum Listener {
    Snapshot(SnapshotFn),
    Event(EventFn),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration side of the bus. Cheap to clone and safe to use from any
/// thread.
#[derive(Clone, Default)]
pub struct Subscribers {
    registry: SharedRegistry,
}

impl Subscribers {
    pub fn subscribe(&self, callback: impl Fn(&TimerSnapshot) + Send + Sync + 'static) -> Subscription {
        self.register(Listener::Snapshot(Arc::new(callback)))
    }

    pub fn subscribe_events(&self, callback: impl Fn(&TimerEvent) + Send + Sync + 'static) -> Subscription {
        self.register(Listener::Event(Arc::new(callback)))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, listener: Listener) -> Subscription {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.insert(id, listener);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn snapshot_listeners(&self) -> Vec<SnapshotFn> {
        lock(&self.registry)
            .listeners
            .values()
            .filter_map(|l| match l {
                Listener::Snapshot(f) => Some(Arc::clone(f)),
                Listener::Event(_) => None,
            })
            .collect()
    }

    fn event_listeners(&self) -> Vec<EventFn> {
        lock(&self.registry)
            .listeners
            .values()
            .filter_map(|l| match l {
                Listener::Event(f) => Some(Arc::clone(f)),
                Listener::Snapshot(_) => None,
            })
            .collect()
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive;
/// call [`Subscription::detach`] to stop receiving notifications.
#[must_use = "keep the subscription to be able to detach it"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn detach(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.remove(&self.id);
        }
    }
}

#[derive(Default)]
pub struct NotificationBus {
    subscribers: Subscribers,
    dirty: bool,
}

impl NotificationBus {
    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// End of frame: broadcast once if anything changed. Returns whether a
    /// broadcast happened.
    pub fn publish(&mut self, snapshot: impl FnOnce() -> TimerSnapshot) -> bool {
        if !std::mem::take(&mut self.dirty) {
            return false;
        }
        let listeners = self.subscribers.snapshot_listeners();
        if listeners.is_empty() {
            return true;
        }
        let snapshot = snapshot();
        for listener in listeners {
            listener(&snapshot);
        }
        true
    }

    pub fn emit(&self, event: &TimerEvent) {
        for listener in self.subscribers.event_listeners() {
            listener(event);
        }
    }
}
