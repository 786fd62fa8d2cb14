//! Derived Cell Implementation
//!
//! A derived cell is a cell whose value is produced by a function of other
//! cells and sequences.
//!
//! # How Derived Cells Work
//!
//! 1. On creation, the function runs once. Every cell it reads becomes a
//!    dependency; the result becomes the initial value.
//!
//! 2. When a dependency changes, the derived cell re-runs immediately
//!    (eagerly, not on next read), rebuilding its dependency set from
//!    scratch so branches that are no longer taken stop triggering it.
//!
//! 3. The new value is written into the underlying cell, equality-gated: a
//!    re-run that produces the same value stops propagation there.
//!
//! # Lifetime
//!
//! The derived cell stays live while any handle to it exists. Dropping the
//! last handle, or calling [`DerivedCell::dispose`], removes every edge; the
//! underlying [`Cell`] keeps its last value but is never updated again.

use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock, Weak};

use tracing::debug;

use super::cell::Comparer;
use super::computation::Computation;
use super::{Cell, Runtime};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{Dependency, ListenerId, NodeId, Observer};

type ComputeFn<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;

struct DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    computation: Computation,
    runtime: Runtime,
    compute: ComputeFn<T>,
    equals: Comparer<T>,
    cell: OnceLock<Cell<T>>,
    me: Weak<DerivedNode<T>>,
}

impl<T> DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn recompute(&self) -> Result<()> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let observer: Arc<dyn Observer> = me;

        // Failures of downstream observers must not cut the rerun loop short;
        // only this node's own function ends it.
        let mut downstream: Option<ReactiveError> = None;
        self.computation.run(|| {
            let value = self
                .computation
                .track(&self.runtime, observer.clone(), || (self.compute)())
                .map_err(|source| ReactiveError::Compute {
                    node: self.computation.id(),
                    source,
                })?;

            match self.cell.get() {
                Some(cell) => {
                    if let Err(err) = cell.apply(value) {
                        downstream.get_or_insert(err);
                    }
                }
                None => {
                    let cell = Cell::from_parts(self.runtime.clone(), value, self.equals.clone());
                    let _ = self.cell.set(cell);
                }
            }
            Ok(())
        })?;

        downstream.map_or(Ok(()), Err)
    }
}

impl<T> Observer for DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.computation.id()
    }

    fn on_state_changed(&self) -> Result<()> {
        if self.computation.is_disposed() {
            return Ok(());
        }
        self.recompute()
    }

    fn register_dependency(&self, dependency: Arc<dyn Dependency>) {
        if let Some(me) = self.me.upgrade() {
            let observer: Arc<dyn Observer> = me;
            self.computation.register(dependency, &observer);
        }
    }
}

/// A cell computed from other reactive values and kept eagerly up to date.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Cell, DerivedCell, Runtime};
///
/// let rt = Runtime::new();
/// let a = Cell::new(&rt, 1);
///
/// let source = a.clone();
/// let d = DerivedCell::new(&rt, move || source.read() * 2 + 1);
/// assert_eq!(d.read(), 3);
///
/// a.write(5).unwrap();
/// assert_eq!(d.read(), 11);
/// ```
#[must_use = "a derived cell stops updating when its last handle is dropped"]
pub struct DerivedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Arc<DerivedNode<T>>,
    cell: Cell<T>,
}

impl<T> DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a derived cell from an infallible function.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        match Self::try_new(runtime, move || Ok::<T, Infallible>(compute())) {
            Ok(derived) => derived,
            Err(err) => unreachable!("infallible derived cell failed its first run: {err}"),
        }
    }

    /// Create a derived cell from a fallible function.
    ///
    /// If the first run fails, every dependency it registered is released
    /// and the error is returned; no derived cell is produced.
    pub fn try_new<F, E>(runtime: &Runtime, compute: F) -> Result<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::try_with_comparer(runtime, compute, |a: &T, b: &T| a == b)
    }
}

impl<T> DerivedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived cell with a custom equality predicate for its value.
    pub fn try_with_comparer<F, E, C>(runtime: &Runtime, compute: F, equals: C) -> Result<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        C: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let compute: ComputeFn<T> = Box::new(move || compute().map_err(Into::into));
        let node = Arc::new_cyclic(|me| DerivedNode {
            computation: Computation::new(),
            runtime: runtime.clone(),
            compute,
            equals: Arc::new(equals),
            cell: OnceLock::new(),
            me: me.clone(),
        });

        if let Err(err) = node.recompute() {
            node.computation.dispose();
            debug!(node = %node.computation.id(), error = %err, "derived cell failed its first run");
            return Err(err);
        }

        let cell = node
            .cell
            .get()
            .cloned()
            .ok_or(ReactiveError::Disposed {
                node: node.computation.id(),
            })?;
        Ok(Self { node, cell })
    }

    /// Identity of the computation (the underlying cell has its own id).
    pub fn node_id(&self) -> NodeId {
        self.node.computation.id()
    }

    /// Get the current value, tracking the underlying cell.
    pub fn read(&self) -> T {
        self.cell.read()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.with(f)
    }

    pub fn read_untracked(&self) -> T {
        self.cell.read_untracked()
    }

    /// The cell holding the computed value.
    pub fn as_cell(&self) -> &Cell<T> {
        &self.cell
    }

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.cell.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: NodeId) {
        self.cell.unsubscribe(observer);
    }

    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.cell.on_change(listener)
    }

    /// Stop recomputing and release every dependency. Idempotent.
    pub fn dispose(&self) {
        if self.node.computation.dispose() {
            debug!(node = %self.node_id(), "derived cell disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.node.computation.is_disposed()
    }

    /// Number of times the function has run.
    pub fn run_count(&self) -> usize {
        self.node.computation.run_count()
    }

    /// Number of dependencies registered by the last run.
    pub fn dependency_count(&self) -> usize {
        self.node.computation.dependency_count()
    }
}

impl<T> Clone for DerivedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            cell: self.cell.clone(),
        }
    }
}

impl<T> Debug for DerivedCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCell")
            .field("id", &self.node_id())
            .field("value", &self.cell.read_untracked())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::SideEffect;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn derived_computes_on_creation() {
        let rt = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let derived = DerivedCell::new(&rt, move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Computed eagerly, before the first read
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(derived.read(), 42);
        assert_eq!(derived.read(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_recomputes_when_dependency_changes() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 1);

        let source = a.clone();
        let derived = DerivedCell::new(&rt, move || source.read() * 2 + 1);
        assert_eq!(derived.read(), 3);
        assert_eq!(derived.dependency_count(), 1);

        a.write(5).unwrap();
        assert_eq!(derived.read(), 11);
        assert_eq!(derived.run_count(), 2);
    }

    #[test]
    fn unchanged_result_stops_propagation() {
        let rt = Runtime::new();
        let n = Cell::new(&rt, 2);

        let source = n.clone();
        let parity = DerivedCell::new(&rt, move || source.read() % 2);

        let downstream_runs = Arc::new(AtomicI32::new(0));
        let runs = downstream_runs.clone();
        let p = parity.clone();
        let _label = DerivedCell::new(&rt, move || {
            runs.fetch_add(1, Ordering::SeqCst);
            if p.read() == 0 { "even" } else { "odd" }
        });

        n.write(4).unwrap();
        assert_eq!(parity.run_count(), 2);
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);

        n.write(5).unwrap();
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dynamic_branches_are_tracked_precisely() {
        let rt = Runtime::new();
        let toggle = Cell::new(&rt, true);
        let a = Cell::new(&rt, "A".to_string());
        let b = Cell::new(&rt, "B".to_string());

        let (t, sa, sb) = (toggle.clone(), a.clone(), b.clone());
        let picked = DerivedCell::new(&rt, move || if t.read() { sa.read() } else { sb.read() });
        assert_eq!(picked.read(), "A");
        assert_eq!(b.observer_count(), 0);

        b.write("X".to_string()).unwrap();
        assert_eq!(picked.run_count(), 1);

        toggle.write(false).unwrap();
        assert_eq!(picked.read(), "X");
        assert_eq!(a.observer_count(), 0);
        assert_eq!(b.observer_count(), 1);

        a.write("Y".to_string()).unwrap();
        assert_eq!(picked.run_count(), 2);
        assert_eq!(picked.read(), "X");
    }

    #[test]
    fn self_invalidation_reruns_exactly_once() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 0);

        let source = a.clone();
        let derived = DerivedCell::new(&rt, move || {
            let v = source.read();
            if v < 1 {
                source.write(v + 1).unwrap();
            }
            v
        });

        assert_eq!(derived.run_count(), 2);
        assert_eq!(derived.read(), 1);
        assert_eq!(a.read(), 1);
    }

    #[test]
    fn first_run_failure_leaves_no_edges() {
        let rt = Runtime::new();
        let divisor = Cell::new(&rt, 0);

        let d = divisor.clone();
        let result = DerivedCell::try_new(&rt, move || {
            10i32.checked_div(d.read()).ok_or("division by zero")
        });

        assert!(matches!(result, Err(ReactiveError::Compute { .. })));
        assert_eq!(divisor.observer_count(), 0);
        assert_eq!(rt.context().depth(), 0);
    }

    #[test]
    fn failed_recompute_keeps_previous_value() {
        let rt = Runtime::new();
        let divisor = Cell::new(&rt, 2);

        let d = divisor.clone();
        let quotient = DerivedCell::try_new(&rt, move || {
            10i32.checked_div(d.read()).ok_or("division by zero")
        })
        .unwrap();
        assert_eq!(quotient.read(), 5);

        let err = divisor.write(0).unwrap_err();
        assert_eq!(err.node(), Some(quotient.node_id()));
        assert_eq!(quotient.read(), 5);

        // Still subscribed: a later fix recovers
        divisor.write(5).unwrap();
        assert_eq!(quotient.read(), 2);
    }

    #[test]
    fn downstream_failure_does_not_drop_pending_rerun() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 0);

        let source = a.clone();
        let doubled = DerivedCell::new(&rt, move || source.read() * 2);

        // Reacts to the intermediate value by writing back, then fails
        let (d, writer) = (doubled.clone(), a.clone());
        let _effect = SideEffect::try_new(&rt, move || {
            if d.read() == 2 {
                writer.write(5)?;
                return Err("rejected intermediate value".into());
            }
            Ok::<(), BoxError>(())
        })
        .unwrap();

        assert!(a.write(1).is_err());
        assert_eq!(a.read(), 5);
        assert_eq!(doubled.read(), a.read() * 2);
    }

    #[test]
    fn panic_in_first_run_leaves_no_edges() {
        let rt = Runtime::new();
        let divisor = Cell::new(&rt, 0);

        let d = divisor.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            DerivedCell::new(&rt, move || 10 / d.read())
        }));

        assert!(result.is_err());
        assert_eq!(divisor.observer_count(), 0);
        assert_eq!(rt.context().depth(), 0);

        // The graph is still usable afterwards
        divisor.write(2).unwrap();
        let d = divisor.clone();
        let quotient = DerivedCell::new(&rt, move || 10 / d.read());
        assert_eq!(quotient.read(), 5);
    }

    #[test]
    fn disposed_derived_never_recomputes() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 1);

        let source = a.clone();
        let derived = DerivedCell::new(&rt, move || source.read() + 1);
        derived.dispose();
        assert!(derived.is_disposed());
        assert_eq!(a.observer_count(), 0);

        a.write(10).unwrap();
        assert_eq!(derived.run_count(), 1);
        assert_eq!(derived.read(), 2);
    }

    #[test]
    fn dropping_last_handle_detaches() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 1);

        let source = a.clone();
        let derived = DerivedCell::new(&rt, move || source.read());
        assert_eq!(a.observer_count(), 1);

        drop(derived);
        assert_eq!(a.observer_count(), 0);
    }

    #[test]
    fn derived_chain_stays_consistent() {
        let rt = Runtime::new();
        let base = Cell::new(&rt, 5);

        let b = base.clone();
        let doubled = DerivedCell::new(&rt, move || b.read() * 2);
        let d = doubled.clone();
        let plus_ten = DerivedCell::new(&rt, move || d.read() + 10);

        assert_eq!(plus_ten.read(), 20);

        for v in [10, -3, 0, 7] {
            base.write(v).unwrap();
            assert_eq!(doubled.read(), v * 2);
            assert_eq!(plus_ten.read(), v * 2 + 10);
        }
    }
}
