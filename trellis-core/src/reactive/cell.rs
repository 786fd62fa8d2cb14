//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read while a derived cell or effect is running, the
//!    cell registers with that computation as one of its dependencies.
//!
//! 2. When a cell's value changes, its change listeners fire, then every
//!    observer is invalidated in registration order.
//!
//! 3. Writes equal to the current value (by the cell's comparer) are
//!    dropped without notifying anyone.
//!
//! # Thread Affinity
//!
//! Writes from a thread other than the runtime's owner are queued on the
//! owner thread and return immediately; the new value is not visible to the
//! caller until the owner thread drains its queue.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

use super::diagnostics::ChangeEvent;
use super::Runtime;
use crate::error::Result;
use crate::graph::{Dependency, ListenerId, ListenerSet, NodeId, Observer, ObserverSet};

/// Equality predicate deciding whether a write is a change.
pub(crate) type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

type Formatter<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

struct CellInner<T> {
    id: NodeId,
    runtime: Runtime,
    value: RwLock<T>,
    equals: Comparer<T>,
    observers: ObserverSet,
    listeners: ListenerSet<T>,
    revision: AtomicU64,
    debug_name: RwLock<Option<String>>,
    formatter: RwLock<Option<Formatter<T>>>,
}

impl<T> Dependency for CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.insert(observer);
    }

    fn unsubscribe(&self, observer: NodeId) {
        self.observers.remove(observer);
    }
}

/// A mutable, equality-gated reactive value.
///
/// Cloning a `Cell` creates another handle to the same value.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Cell, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
///
/// count.write(5).unwrap();
/// assert_eq!(count.read(), 5);
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell compared with `PartialEq`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::from_parts(runtime.clone(), value, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cell with a custom equality predicate.
    ///
    /// Useful for types without `PartialEq`, or to force every write through
    /// with `|_, _| false`.
    pub fn with_comparer<F>(runtime: &Runtime, value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::from_parts(runtime.clone(), value, Arc::new(equals))
    }

    pub(crate) fn from_parts(runtime: Runtime, value: T, equals: Comparer<T>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: NodeId::new(),
                runtime,
                value: RwLock::new(value),
                equals,
                observers: ObserverSet::new(),
                listeners: ListenerSet::default(),
                revision: AtomicU64::new(0),
                debug_name: RwLock::new(None),
                formatter: RwLock::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub(crate) fn comparer(&self) -> Comparer<T> {
        Arc::clone(&self.inner.equals)
    }

    /// Get the current value, registering this cell with the running
    /// computation if there is one.
    pub fn read(&self) -> T {
        self.track();
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning. Tracks like [`read`].
    ///
    /// `f` must not write to this cell.
    ///
    /// [`read`]: Self::read
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.inner.value.read())
    }

    /// Get the current value without establishing a dependency.
    pub fn read_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store a new value and notify observers.
    ///
    /// Returns the first error raised by an observer re-running because of
    /// this write. Off the owner thread the write is queued and `Ok(())` is
    /// returned immediately.
    pub fn write(&self, value: T) -> Result<()> {
        if (self.inner.equals)(&*self.inner.value.read(), &value) {
            return Ok(());
        }

        if !self.inner.runtime.is_owner_thread() {
            let cell = self.clone();
            self.inner.runtime.marshal(
                self.inner.id,
                Box::new(move || {
                    if let Err(err) = cell.apply(value) {
                        error!(node = %cell.node_id(), error = %err, "marshalled write failed");
                    }
                }),
            );
            return Ok(());
        }

        self.apply(value)
    }

    /// Update the value using a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&*self.inner.value.read());
        self.write(next)
    }

    /// Register `observer` for invalidation. Idempotent.
    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.inner.subscribe(observer);
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, observer: NodeId) {
        self.inner.unsubscribe(observer);
    }

    /// This cell as a graph dependency, for observers that register reads
    /// by hand.
    pub fn as_dependency(&self) -> Arc<dyn Dependency> {
        self.inner.clone()
    }

    /// Register a callback run with the new value after every stored write,
    /// before observers are invalidated.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Number of stored writes so far.
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    pub fn set_debug_name(&self, name: impl Into<String>) {
        *self.inner.debug_name.write() = Some(name.into());
    }

    pub fn debug_name(&self) -> Option<String> {
        self.inner.debug_name.read().clone()
    }

    /// Render new values into diagnostics change events with `format`.
    pub fn set_value_formatter<F>(&self, format: F)
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        *self.inner.formatter.write() = Some(Arc::new(format));
    }

    /// Store and propagate on the current thread. Callers have already
    /// handled owner-thread marshalling.
    pub(crate) fn apply(&self, value: T) -> Result<()> {
        {
            let mut current = self.inner.value.write();
            if (self.inner.equals)(&*current, &value) {
                return Ok(());
            }
            *current = value;
        }
        let revision = self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(node = %self.inner.id, revision, "cell changed");

        if !self.inner.listeners.is_empty() {
            let value = self.inner.value.read().clone();
            self.inner.listeners.emit(&value);
        }

        let notified = self.inner.runtime.notify(self.inner.observers.snapshot());

        self.inner.runtime.diagnostics().record(|| {
            let formatter = self.inner.formatter.read().clone();
            ChangeEvent {
                node: self.inner.id,
                name: self.debug_name(),
                type_name: std::any::type_name::<T>(),
                value: formatter.map(|format| format(&*self.inner.value.read())),
                revision,
            }
        });

        notified
    }

    fn track(&self) {
        if let Some(observer) = self.inner.runtime.context().current() {
            observer.register_dependency(self.inner.clone());
        }
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    /// Render new values into diagnostics change events with `Debug`.
    pub fn debug_values(&self) {
        self.set_value_formatter(|value| format!("{value:?}"));
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("name", &self.debug_name())
            .field("value", &*self.inner.value.read())
            .field("revision", &self.revision())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
