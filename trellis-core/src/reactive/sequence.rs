//! Reactive Sequence Implementation
//!
//! An ordered, mutable collection that computations can depend on.
//!
//! Invalidation is coarse: the sequence carries a version cell that is bumped
//! on every structural mutation, and any read registers both the sequence
//! and that version cell. A mutation therefore re-runs every reader, whatever
//! part of the collection it looked at, at the cost of a single fan-out.
//!
//! Mutations also fire [`SequenceChange`] listeners describing what changed,
//! for consumers that want to patch a view instead of rebuilding it.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, trace};

use super::{Cell, Runtime};
use crate::error::{ReactiveError, Result};
use crate::graph::{Dependency, ListenerId, ListenerSet, NodeId, Observer, ObserverSet};

/// Structural change applied to a [`ReactiveSequence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceChange {
    Inserted { index: usize },
    Removed { index: usize },
    Replaced { index: usize },
    Appended { start: usize, count: usize },
    Cleared,
    /// Every item was replaced; `len` is the new length.
    Reset { len: usize },
}

struct SequenceInner<T> {
    id: NodeId,
    runtime: Runtime,
    items: RwLock<Vec<T>>,
    version: Cell<u64>,
    observers: ObserverSet,
    listeners: ListenerSet<SequenceChange>,
}

impl<T> Dependency for SequenceInner<T>
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

/// An ordered collection whose readers re-run on any structural change.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{DerivedCell, ReactiveSequence, Runtime};
///
/// let rt = Runtime::new();
/// let seq = ReactiveSequence::new(&rt);
///
/// let s = seq.clone();
/// let sum = DerivedCell::new(&rt, move || s.with(|items| items.iter().sum::<i32>()));
///
/// seq.insert(0, 1).unwrap();
/// seq.insert(1, 5).unwrap();
/// assert_eq!(sum.read(), 6);
///
/// seq.remove_at(0).unwrap();
/// assert_eq!(sum.read(), 5);
/// ```
pub struct ReactiveSequence<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SequenceInner<T>>,
}

/// A structural edit. Returns `None` when it left the items untouched.
type Mutation<T> = Box<dyn FnOnce(&mut Vec<T>) -> Result<Option<SequenceChange>> + Send>;

impl<T> ReactiveSequence<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_vec(runtime, Vec::new())
    }

    /// Create a sequence holding `items`.
    pub fn from_vec(runtime: &Runtime, items: Vec<T>) -> Self {
        let id = NodeId::new();
        let version = Cell::new(runtime, 0u64);
        version.set_debug_name(format!("{id}.version"));
        Self {
            inner: Arc::new(SequenceInner {
                id,
                runtime: runtime.clone(),
                items: RwLock::new(items),
                version,
                observers: ObserverSet::new(),
                listeners: ListenerSet::default(),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    // ---- Reads ----

    pub fn len(&self) -> usize {
        self.track();
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.track();
        self.inner.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.track();
        self.inner.items.read().get(index).cloned()
    }

    /// Borrow the items without cloning.
    ///
    /// `f` must not mutate this sequence.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.track();
        f(self.inner.items.read().as_slice())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.track();
        self.inner.items.read().clone()
    }

    /// Iterate over a snapshot of the items.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }

    /// Number of structural mutations so far. Does not track.
    pub fn version(&self) -> u64 {
        self.inner.version.read_untracked()
    }

    // ---- Mutations ----

    /// Insert `item` at `index`, shifting later items right.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            if index > items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, item);
            Ok(Some(SequenceChange::Inserted { index }))
        }))
    }

    pub fn push(&self, item: T) -> Result<()> {
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            items.push(item);
            Ok(Some(SequenceChange::Inserted {
                index: items.len() - 1,
            }))
        }))
    }

    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            if index >= items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index);
            Ok(Some(SequenceChange::Removed { index }))
        }))
    }

    /// Replace the item at `index`.
    pub fn set(&self, index: usize, item: T) -> Result<()> {
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(ReactiveError::IndexOutOfBounds { index, len })?;
            *slot = item;
            Ok(Some(SequenceChange::Replaced { index }))
        }))
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate_unit(Box::new(|items: &mut Vec<T>| {
            items.clear();
            Ok(Some(SequenceChange::Cleared))
        }))
    }

    /// Append every item with a single notification. Appending nothing is a
    /// no-op.
    pub fn append_range<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let extra: Vec<T> = items.into_iter().collect();
        if extra.is_empty() {
            return Ok(());
        }
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            let start = items.len();
            let count = extra.len();
            items.extend(extra);
            Ok(Some(SequenceChange::Appended { start, count }))
        }))
    }

    /// Replace the whole contents with a single notification.
    pub fn replace_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let replacement: Vec<T> = items.into_iter().collect();
        self.mutate_unit(Box::new(move |items: &mut Vec<T>| {
            *items = replacement;
            Ok(Some(SequenceChange::Reset { len: items.len() }))
        }))
    }

    // ---- Subscriptions ----

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.inner.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: NodeId) {
        self.inner.unsubscribe(observer);
    }

    pub fn as_dependency(&self) -> Arc<dyn Dependency> {
        self.inner.clone()
    }

    /// Register a callback run with each structural change, before readers
    /// are invalidated.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SequenceChange) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Number of observers registered directly on the sequence.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    fn track(&self) {
        if let Some(observer) = self.inner.runtime.context().current() {
            observer.register_dependency(self.inner.clone());
            observer.register_dependency(self.inner.version.as_dependency());
        }
    }

    fn mutate_unit(&self, mutation: Mutation<T>) -> Result<()> {
        self.mutate(mutation).map(|_| ())
    }

    /// Apply `mutation`, or queue it on the owner thread. Returns whether
    /// the items changed; a queued mutation counts as a change.
    fn mutate(&self, mutation: Mutation<T>) -> Result<bool> {
        if !self.inner.runtime.is_owner_thread() {
            let sequence = self.clone();
            self.inner.runtime.marshal(
                self.inner.id,
                Box::new(move || {
                    if let Err(err) = sequence.apply(mutation) {
                        error!(node = %sequence.node_id(), error = %err, "marshalled sequence mutation failed");
                    }
                }),
            );
            return Ok(true);
        }
        self.apply(mutation)
    }

    fn apply(&self, mutation: Mutation<T>) -> Result<bool> {
        let change = {
            let mut items = self.inner.items.write();
            mutation(&mut *items)?
        };
        let Some(change) = change else {
            return Ok(false);
        };
        trace!(node = %self.inner.id, ?change, "sequence changed");
        self.inner.listeners.emit(&change);

        // Readers are registered on both the sequence and its version; the
        // batch makes each of them run once.
        let runtime = &self.inner.runtime;
        runtime.batch(|| {
            let next = self.inner.version.read_untracked() + 1;
            self.inner.version.apply(next)?;
            runtime.notify(self.inner.observers.snapshot())
        })?;
        Ok(true)
    }
}

impl<T> ReactiveSequence<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn contains(&self, item: &T) -> bool {
        self.track();
        self.inner.items.read().contains(item)
    }

    /// Position of the first item equal to `item`.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.track();
        self.inner.items.read().iter().position(|x| x == item)
    }

    /// Remove the first item equal to `item`.
    ///
    /// Returns `Ok(false)`, without notifying anyone, if no item matches. Off
    /// the owner thread the result reflects the items at the time of the
    /// call, and the removal itself is queued.
    pub fn remove(&self, item: &T) -> Result<bool> {
        if !self.inner.items.read().contains(item) {
            return Ok(false);
        }
        let target = item.clone();
        self.mutate(Box::new(move |items: &mut Vec<T>| {
            Ok(items.iter().position(|x| *x == target).map(|index| {
                items.remove(index);
                SequenceChange::Removed { index }
            }))
        }))
    }
}

impl<T> Clone for ReactiveSequence<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ReactiveSequence<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSequence")
            .field("id", &self.inner.id)
            .field("items", &*self.inner.items.read())
            .field("version", &self.version())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{DerivedCell, SideEffect};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn sum_follows_structural_changes() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::new(&rt);

        let s = seq.clone();
        let sum = DerivedCell::new(&rt, move || s.iter().sum::<i32>());
        assert_eq!(sum.read(), 0);

        seq.insert(0, 1).unwrap();
        assert_eq!(sum.read(), 1);
        seq.insert(1, 5).unwrap();
        assert_eq!(sum.read(), 6);
        seq.remove_at(0).unwrap();
        assert_eq!(sum.read(), 5);
    }

    #[test]
    fn reader_registers_sequence_and_version() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::from_vec(&rt, vec![1, 2, 3]);

        let s = seq.clone();
        let len = DerivedCell::new(&rt, move || s.len());
        assert_eq!(len.dependency_count(), 2);
        assert_eq!(seq.observer_count(), 1);

        // Registered twice, invalidated once per mutation
        seq.push(4).unwrap();
        assert_eq!(len.run_count(), 2);
        assert_eq!(len.read(), 4);
    }

    #[test]
    fn replacing_an_item_reruns_readers() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::from_vec(&rt, vec!["a".to_string()]);
        let counter = Arc::new(AtomicI32::new(0));

        let (s, c) = (seq.clone(), counter.clone());
        let _effect = SideEffect::new(&rt, move || {
            s.len();
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Length unchanged, but any structural change re-runs readers
        seq.set(0, "b".to_string()).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(seq.get(0).as_deref(), Some("b"));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::from_vec(&rt, vec![1]);

        assert!(matches!(
            seq.insert(3, 0),
            Err(ReactiveError::IndexOutOfBounds { index: 3, len: 1 })
        ));
        assert!(matches!(
            seq.remove_at(1),
            Err(ReactiveError::IndexOutOfBounds { index: 1, len: 1 })
        ));
        assert!(seq.set(5, 0).is_err());
        assert_eq!(seq.version(), 0);
        assert_eq!(seq.to_vec(), vec![1]);
    }

    #[test]
    fn empty_append_is_a_no_op() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::<i32>::new(&rt);

        let s = seq.clone();
        let len = DerivedCell::new(&rt, move || s.len());

        seq.append_range(Vec::new()).unwrap();
        assert_eq!(seq.version(), 0);
        assert_eq!(len.run_count(), 1);

        seq.append_range([1, 2, 3]).unwrap();
        assert_eq!(seq.version(), 1);
        assert_eq!(len.run_count(), 2);
        assert_eq!(len.read(), 3);
    }

    #[test]
    fn removing_absent_item_changes_nothing() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::from_vec(&rt, vec!["a".to_string(), "b".to_string()]);

        let s = seq.clone();
        let len = DerivedCell::new(&rt, move || s.len());

        assert!(!seq.remove(&"z".to_string()).unwrap());
        assert_eq!(seq.version(), 0);
        assert_eq!(len.run_count(), 1);
        assert_eq!(seq.to_vec(), vec!["a", "b"]);
    }

    #[test]
    fn removing_present_item_notifies_readers() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::from_vec(&rt, vec![1, 2, 3, 2]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        seq.on_change(move |change| l.lock().push(change.clone()));
        let s = seq.clone();
        let has_two = DerivedCell::new(&rt, move || s.contains(&2));
        let s = seq.clone();
        let position = DerivedCell::new(&rt, move || s.index_of(&2));
        assert_eq!(position.read(), Some(1));

        // Only the first match goes
        assert!(seq.remove(&2).unwrap());
        assert_eq!(seq.to_vec(), vec![1, 3, 2]);
        assert_eq!(position.read(), Some(2));
        assert!(has_two.read());

        assert!(seq.remove(&2).unwrap());
        assert!(!has_two.read());
        assert_eq!(position.read(), None);
        assert_eq!(seq.version(), 2);
        assert_eq!(
            *log.lock(),
            vec![
                SequenceChange::Removed { index: 1 },
                SequenceChange::Removed { index: 2 },
            ]
        );
    }

    #[test]
    fn listeners_describe_each_change() {
        let rt = Runtime::new();
        let seq = ReactiveSequence::new(&rt);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        seq.on_change(move |change| l.lock().push(change.clone()));

        seq.push(1).unwrap();
        seq.append_range([2, 3]).unwrap();
        seq.set(0, 9).unwrap();
        seq.remove_at(1).unwrap();
        seq.replace_all([4, 5, 6, 7]).unwrap();
        seq.clear().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                SequenceChange::Inserted { index: 0 },
                SequenceChange::Appended { start: 1, count: 2 },
                SequenceChange::Replaced { index: 0 },
                SequenceChange::Removed { index: 1 },
                SequenceChange::Reset { len: 4 },
                SequenceChange::Cleared,
            ]
        );
        assert_eq!(seq.version(), 6);
    }

    #[test]
    fn change_serializes_with_kind_tag() {
        let json = serde_json::to_value(SequenceChange::Appended { start: 2, count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "appended", "start": 2, "count": 3 }));
    }

    #[test]
    fn off_thread_mutation_is_queued_for_owner() {
        let rt = Runtime::new();
        let mut queue = rt.install_channel_dispatcher();
        let seq = ReactiveSequence::new(&rt);

        let remote = seq.clone();
        std::thread::spawn(move || remote.push(7).unwrap())
            .join()
            .unwrap();

        assert!(seq.is_empty());
        assert_eq!(queue.drain(), 1);
        assert_eq!(seq.to_vec(), vec![7]);
    }
}
