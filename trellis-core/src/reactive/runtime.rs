//! Reactive Runtime
//!
//! The runtime is one reactive graph instance. It owns the execution context
//! used for dependency tracking, remembers which thread owns the graph, and
//! holds the dispatcher used to hand writes from other threads back to that
//! owner.
//!
//! # How It Works
//!
//! 1. Every cell, derived cell, effect and sequence is created against a
//!    runtime and keeps a handle to it.
//!
//! 2. When a derived cell or effect runs, it pushes itself onto the runtime's
//!    [`ExecutionContext`]; cells read during the run register with it.
//!
//! 3. When a cell's value changes, it asks the runtime to notify its
//!    observers. Outside a batch they re-run immediately, in registration
//!    order. Inside a batch they are queued and each runs once when the
//!    outermost batch ends.
//!
//! # Thread Affinity
//!
//! The thread that calls [`Runtime::new`] is the owner thread. Handles can be
//! sent anywhere, but writes made off the owner thread are marshalled through
//! the installed [`Dispatcher`]. Without one, the write falls back to running
//! on the calling thread, which breaks single-writer confinement if several
//! foreign threads do it at once.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::context::ExecutionContext;
use super::diagnostics::Diagnostics;
use super::dispatch::{self, DispatchQueue, Dispatcher, Job};
use super::{Cell, DerivedCell, ReactiveSequence, SideEffect};
use crate::error::{BoxError, Result};
use crate::graph::{NodeId, Observer};

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name used in log output.
    pub label: Option<String>,

    /// Keep notifying sibling observers when one of them fails.
    ///
    /// When enabled, every failure is logged and the first one is returned
    /// once the fan-out completes. When disabled, the first failure stops
    /// the fan-out and is returned immediately.
    pub fault_isolation: bool,

    /// Record [`ChangeEvent`](super::ChangeEvent)s for every stored write.
    pub diagnostics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: None,
            fault_isolation: true,
            diagnostics: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_fault_isolation(mut self, enabled: bool) -> Self {
        self.fault_isolation = enabled;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

struct RuntimeInner {
    owner: ThreadId,
    config: RuntimeConfig,
    context: ExecutionContext,
    dispatcher: RwLock<Option<Arc<dyn Dispatcher>>>,
    diagnostics: Diagnostics,
}

/// Handle to a reactive graph. Cloning shares the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime owned by the calling thread.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with explicit settings, owned by the calling thread.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics);
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                owner: thread::current().id(),
                config,
                context: ExecutionContext::new(),
                dispatcher: RwLock::new(None),
                diagnostics,
            }),
        };
        debug!(runtime = runtime.label(), owner = ?runtime.owner_thread(), "runtime created");
        runtime
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn label(&self) -> &str {
        self.inner.config.label.as_deref().unwrap_or("trellis")
    }

    /// The thread all graph mutation is confined to.
    pub fn owner_thread(&self) -> ThreadId {
        self.inner.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    /// The dependency-tracking context of this graph.
    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    /// Install the dispatcher used for off-thread writes, replacing any
    /// previous one.
    pub fn set_dispatcher<D>(&self, dispatcher: D)
    where
        D: Dispatcher + 'static,
    {
        *self.inner.dispatcher.write() = Some(Arc::new(dispatcher));
        debug!(runtime = self.label(), "dispatcher installed");
    }

    /// Remove the dispatcher. Off-thread writes fall back to running inline.
    pub fn clear_dispatcher(&self) {
        *self.inner.dispatcher.write() = None;
    }

    /// Install a channel dispatcher and return the queue the owner thread
    /// must drain.
    pub fn install_channel_dispatcher(&self) -> DispatchQueue {
        let (dispatcher, queue) = dispatch::channel_on(self.inner.owner);
        self.set_dispatcher(dispatcher);
        queue
    }

    /// Run `f` without registering any dependency for reads inside it.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.inner.context.push_untrack();
        f()
    }

    /// Group several writes so each affected observer runs once.
    ///
    /// Values are stored immediately; observers are queued and notified when
    /// the outermost batch returns. Writes made by observers during that flush
    /// are queued too and drained in the same pass. If `f` fails, queued
    /// observers are still flushed so the graph matches the writes that did
    /// happen, and `f`'s error is returned.
    pub fn batch<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let scope = BatchScope::enter(&self.inner.context);
        let outcome = f();

        // The outermost scope drains with the depth still raised, so writes
        // made by flushed observers queue behind them instead of recursing.
        let flushed = if scope.is_outermost() {
            let context = &self.inner.context;
            trace!(runtime = self.label(), "flushing batch");
            self.fan_out(std::iter::from_fn(|| context.take_next_dirty()))
        } else {
            Ok(())
        };
        if let Some(leftover) = scope.finish() {
            if !leftover.is_empty() {
                warn!(runtime = self.label(), count = leftover.len(), "batch flush stopped early");
            }
        }

        match (outcome, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(flush_err)) => {
                warn!(runtime = self.label(), error = %flush_err, "batch flush failed after batch body error");
                Err(err)
            }
        }
    }

    pub fn cell<T>(&self, value: T) -> Cell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Cell::new(self, value)
    }

    pub fn derived<T, F>(&self, compute: F) -> DerivedCell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        DerivedCell::new(self, compute)
    }

    pub fn try_derived<T, F, E>(&self, compute: F) -> Result<DerivedCell<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        DerivedCell::try_new(self, compute)
    }

    pub fn effect<F>(&self, action: F) -> SideEffect
    where
        F: Fn() + Send + Sync + 'static,
    {
        SideEffect::new(self, action)
    }

    pub fn paused_effect<F>(&self, action: F) -> SideEffect
    where
        F: Fn() + Send + Sync + 'static,
    {
        SideEffect::paused(self, action)
    }

    pub fn sequence<T>(&self) -> ReactiveSequence<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ReactiveSequence::new(self)
    }

    /// Invalidate `observers`, or queue them if a batch is active.
    pub(crate) fn notify<I>(&self, observers: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Observer>>,
    {
        let context = &self.inner.context;
        if context.is_batching() {
            for observer in observers {
                context.register_dirty(observer);
            }
            return Ok(());
        }
        self.fan_out(observers)
    }

    /// Hand `job` to the owner thread, or run it here if that is impossible.
    pub(crate) fn marshal(&self, origin: NodeId, job: Job) {
        let dispatcher = self.inner.dispatcher.read().clone();
        let rejected = match dispatcher {
            Some(dispatcher) => match dispatcher.dispatch(job) {
                Ok(()) => {
                    trace!(runtime = self.label(), node = %origin, "write queued for owner thread");
                    return;
                }
                Err(job) => job,
            },
            None => job,
        };

        warn!(
            runtime = self.label(),
            node = %origin,
            "owner-thread dispatcher unavailable; applying write on calling thread"
        );
        rejected();
    }

    fn fan_out<I>(&self, observers: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Observer>>,
    {
        let mut first_error = None;
        for observer in observers {
            if let Err(err) = observer.on_state_changed() {
                if !self.inner.config.fault_isolation {
                    return Err(err);
                }
                warn!(
                    runtime = self.label(),
                    observer = %observer.node_id(),
                    error = %err,
                    "observer failed during propagation"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.label())
            .field("owner", &self.inner.owner)
            .field("has_dispatcher", &self.inner.dispatcher.read().is_some())
            .finish()
    }
}

/// Balances `push_batch` with `pop_batch`, even when the batch body panics.
struct BatchScope<'a> {
    context: Option<&'a ExecutionContext>,
    depth: usize,
}

impl<'a> BatchScope<'a> {
    fn enter(context: &'a ExecutionContext) -> Self {
        let depth = context.push_batch();
        Self {
            context: Some(context),
            depth,
        }
    }

    fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    fn finish(mut self) -> Option<Vec<Arc<dyn Observer>>> {
        self.context.take().and_then(ExecutionContext::pop_batch)
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            if let Some(dirty) = context.pop_batch() {
                if !dirty.is_empty() {
                    warn!(count = dirty.len(), "discarding batched invalidations after panic");
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
