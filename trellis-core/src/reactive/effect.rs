//! Side Effect Implementation
//!
//! A side effect is a computation that runs for what it does rather than for
//! a value. It reads cells, and re-runs whenever one of them changes.
//!
//! # How Side Effects Work
//!
//! 1. When created, the effect runs its action immediately to establish
//!    initial dependencies (unless created paused).
//!
//! 2. When any dependency changes, the effect re-runs on the spot.
//!
//! 3. Before re-running, the effect drops its old dependencies and tracks
//!    new ones during execution.
//!
//! # Differences from Derived Cells
//!
//! - Derived cells produce a value; effects do not.
//! - A derived cell stops propagation when its value is unchanged; an effect
//!   has nothing downstream.
//! - Effects can start paused and be resumed later.
//!
//! # Lifetime
//!
//! An effect lives as long as a handle to it exists. Dropping the last
//! handle unsubscribes it from everything, so keep the handle around for as
//! long as the effect should run.

use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use super::computation::Computation;
use super::Runtime;
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{Dependency, NodeId, Observer};

type ActionFn = Box<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

struct EffectNode {
    computation: Computation,
    runtime: Runtime,
    action: ActionFn,
    paused: AtomicBool,
    me: Weak<EffectNode>,
}

impl EffectNode {
    fn execute(&self) -> Result<()> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let observer: Arc<dyn Observer> = me;

        self.computation.run(|| {
            self.computation
                .track(&self.runtime, observer.clone(), || (self.action)())
                .map_err(|source| ReactiveError::Compute {
                    node: self.computation.id(),
                    source,
                })
        })
    }
}

impl Observer for EffectNode {
    fn node_id(&self) -> NodeId {
        self.computation.id()
    }

    fn on_state_changed(&self) -> Result<()> {
        if self.computation.is_disposed() || self.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        self.execute()
    }

    fn register_dependency(&self, dependency: Arc<dyn Dependency>) {
        if let Some(me) = self.me.upgrade() {
            let observer: Arc<dyn Observer> = me;
            self.computation.register(dependency, &observer);
        }
    }
}

/// A computation that re-runs its action when the cells it read change.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use trellis_core::reactive::{Cell, Runtime, SideEffect};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let (c, s) = (count.clone(), seen.clone());
/// let _effect = SideEffect::new(&rt, move || s.lock().unwrap().push(c.read()));
///
/// count.write(5).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![0, 5]);
/// ```
#[must_use = "an effect stops running when its last handle is dropped"]
pub struct SideEffect {
    node: Arc<EffectNode>,
}

impl SideEffect {
    /// Create an effect and run it immediately.
    pub fn new<F>(runtime: &Runtime, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        match Self::try_new(runtime, move || {
            action();
            Ok::<(), Infallible>(())
        }) {
            Ok(effect) => effect,
            Err(err) => unreachable!("infallible effect failed its first run: {err}"),
        }
    }

    /// Create an effect from a fallible action and run it immediately.
    ///
    /// If the first run fails, its dependencies are released and the error
    /// is returned.
    pub fn try_new<F, E>(runtime: &Runtime, action: F) -> Result<Self>
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let effect = Self::build(runtime, action, false);
        if let Err(err) = effect.node.execute() {
            effect.node.computation.dispose();
            debug!(node = %effect.node_id(), error = %err, "effect failed its first run");
            return Err(err);
        }
        Ok(effect)
    }

    /// Create an effect that does not run until [`resume`](Self::resume)
    /// is called.
    pub fn paused<F>(runtime: &Runtime, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(
            runtime,
            move || {
                action();
                Ok::<(), Infallible>(())
            },
            true,
        )
    }

    /// Fallible counterpart of [`paused`](Self::paused).
    pub fn try_paused<F, E>(runtime: &Runtime, action: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(runtime, action, true)
    }

    fn build<F, E>(runtime: &Runtime, action: F, paused: bool) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let action: ActionFn = Box::new(move || action().map_err(Into::into));
        let node = Arc::new_cyclic(|me| EffectNode {
            computation: Computation::new(),
            runtime: runtime.clone(),
            action,
            paused: AtomicBool::new(paused),
            me: me.clone(),
        });
        Self { node }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.computation.id()
    }

    /// Run a paused effect once and let it react normally from then on.
    ///
    /// Does nothing if the effect is not paused or has been disposed.
    pub fn resume(&self) -> Result<()> {
        if self.is_disposed() || !self.node.paused.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(node = %self.node_id(), "effect resumed");
        self.node.execute()
    }

    pub fn is_paused(&self) -> bool {
        self.node.paused.load(Ordering::Acquire)
    }

    /// Stop the effect permanently and release every dependency. Idempotent.
    pub fn dispose(&self) {
        if self.node.computation.dispose() {
            debug!(node = %self.node_id(), "effect disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.node.computation.is_disposed()
    }

    /// Number of times the action has run.
    pub fn run_count(&self) -> usize {
        self.node.computation.run_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.node.computation.dependency_count()
    }
}

impl Clone for SideEffect {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl Debug for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffect")
            .field("id", &self.node_id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("paused", &self.is_paused())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
