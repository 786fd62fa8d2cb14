//! Observer and listener registries.
//!
//! Both registries keep insertion order so fan-out happens in the order
//! subscribers registered. Neither holds its lock while calling out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::node::{NodeId, Observer};

/// Point-in-time copy of an observer registry.
pub type ObserverSnapshot = SmallVec<[Arc<dyn Observer>; 4]>;

/// Non-owning, ordered set of observers held by a dependency.
///
/// Entries are weak: an observer that is dropped without unsubscribing is
/// pruned the next time a snapshot is taken.
#[derive(Default)]
pub struct ObserverSet {
    entries: Mutex<IndexMap<NodeId, Weak<dyn Observer>>>,
}

impl ObserverSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Returns `false` if it was already present, in which
    /// case its original position is kept.
    pub fn insert(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut entries = self.entries.lock();
        let id = observer.node_id();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, Arc::downgrade(observer));
        true
    }

    /// Remove an observer. Returns `false` if it was not present.
    pub fn remove(&self, id: NodeId) -> bool {
        self.entries.lock().shift_remove(&id).is_some()
    }

    /// Whether the observer is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy out the live observers in registration order.
    ///
    /// Fan-out must iterate the snapshot, never the live set: a handler may
    /// subscribe or dispose other observers while it runs.
    pub fn snapshot(&self) -> ObserverSnapshot {
        let mut entries = self.entries.lock();
        let mut live = ObserverSnapshot::new();
        entries.retain(|_, weak| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }
}

/// Identifier returned when registering a change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered registry of event-style callbacks.
pub struct ListenerSet<E> {
    entries: Mutex<IndexMap<ListenerId, Listener<E>>>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
        }
    }
}

impl<E> ListenerSet<E> {
    /// Register a callback.
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.entries.lock().insert(id, Arc::new(listener));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.entries.lock().shift_remove(&id).is_some()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Invoke every callback in registration order.
    pub fn emit(&self, event: &E) {
        let listeners: SmallVec<[Listener<E>; 2]> =
            self.entries.lock().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}
