//! Shared run protocol for derived cells and side effects.
//!
//! A computation moves between three states:
//!
//! - **Idle**: not running; an invalidation starts a run.
//! - **Running**: an invalidation only sets `needs_rerun`.
//! - **Running + pending rerun**: when the current pass finishes, exactly one
//!   more pass runs.
//!
//! Re-runs are driven by a loop rather than recursion, so long invalidation
//! chains do not grow the stack.
//!
//! Every pass starts by dropping all dependency edges; the pass itself
//! re-registers exactly what it reads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::Runtime;
use crate::error::Result;
use crate::graph::{Dependency, NodeId, Observer};

pub(crate) struct Computation {
    id: NodeId,
    dependencies: Mutex<IndexMap<NodeId, Arc<dyn Dependency>>>,
    running: AtomicBool,
    needs_rerun: AtomicBool,
    disposed: AtomicBool,
    runs: AtomicUsize,
}

impl Computation {
    pub(crate) fn new() -> Self {
        Self {
            id: NodeId::new(),
            dependencies: Mutex::new(IndexMap::new()),
            running: AtomicBool::new(false),
            needs_rerun: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.lock().len()
    }

    /// Record `dependency` and subscribe `observer` to it if it is new.
    pub(crate) fn register(&self, dependency: Arc<dyn Dependency>, observer: &Arc<dyn Observer>) {
        if self.is_disposed() {
            return;
        }
        {
            let mut dependencies = self.dependencies.lock();
            if dependencies.contains_key(&dependency.node_id()) {
                return;
            }
            dependencies.insert(dependency.node_id(), Arc::clone(&dependency));
        }
        dependency.subscribe(observer);
    }

    /// Stop all future runs and drop every edge. Returns `false` if already
    /// disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.release_dependencies();
        true
    }

    /// Run `f` with `observer` as the current computation, tracking forced on.
    pub(crate) fn track<R>(
        &self,
        runtime: &Runtime,
        observer: Arc<dyn Observer>,
        f: impl FnOnce() -> R,
    ) -> R {
        let context = runtime.context();
        let _scope = context.push(observer);
        context.force_track(f)
    }

    /// Run passes until no invalidation arrived during the last one.
    ///
    /// If a run is already in progress, only marks it for a rerun. A failing
    /// pass ends the loop and drops any pending rerun.
    pub(crate) fn run(&self, mut pass: impl FnMut() -> Result<()>) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        if self.running.swap(true, Ordering::AcqRel) {
            self.needs_rerun.store(true, Ordering::Release);
            trace!(node = %self.id, "invalidated while running; rerun queued");
            return Ok(());
        }
        let _running = RunningGuard(&self.running);

        loop {
            self.release_dependencies();
            let pass_number = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(node = %self.id, pass = pass_number, "running computation");

            if let Err(err) = pass() {
                self.needs_rerun.store(false, Ordering::Release);
                return Err(err);
            }
            if self.is_disposed() || !self.needs_rerun.swap(false, Ordering::AcqRel) {
                return Ok(());
            }
        }
    }

    fn release_dependencies(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dependency in dependencies.values() {
            dependency.unsubscribe(self.id);
        }
    }
}

impl Drop for Computation {
    fn drop(&mut self) {
        self.release_dependencies();
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::graph::recording::RecordingObserver;
    use crate::graph::ObserverSet;

    struct Source {
        id: NodeId,
        observers: ObserverSet,
    }

    impl Source {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(),
                observers: ObserverSet::new(),
            })
        }
    }

    impl Dependency for Source {
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

    #[test]
    fn register_subscribes_once() {
        let computation = Computation::new();
        let source = Source::new();
        let observer: Arc<dyn Observer> = RecordingObserver::new();

        computation.register(source.clone(), &observer);
        computation.register(source.clone(), &observer);

        assert_eq!(computation.dependency_count(), 1);
        assert_eq!(source.observers.len(), 1);
    }

    #[test]
    fn each_pass_starts_without_dependencies() {
        let computation = Computation::new();
        let source = Source::new();
        let observer: Arc<dyn Observer> = RecordingObserver::new();
        computation.register(source.clone(), &observer);

        computation
            .run(|| {
                assert_eq!(computation.dependency_count(), 0);
                assert!(source.observers.is_empty());
                Ok(())
            })
            .unwrap();
        assert_eq!(computation.run_count(), 1);
    }

    #[test]
    fn invalidation_during_run_reruns_once() {
        let computation = Computation::new();
        let mut passes = 0;

        computation
            .run(|| {
                passes += 1;
                if passes == 1 {
                    // Re-entrant invalidations collapse into one rerun.
                    computation.run(|| unreachable!()).unwrap();
                    computation.run(|| unreachable!()).unwrap();
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(passes, 2);
        assert_eq!(computation.run_count(), 2);
    }

    #[test]
    fn failed_pass_drops_pending_rerun() {
        let computation = Computation::new();
        let mut passes = 0;

        let result = computation.run(|| {
            passes += 1;
            computation.run(|| Ok(())).unwrap();
            Err(ReactiveError::Disposed { node: computation.id() })
        });

        assert!(result.is_err());
        assert_eq!(passes, 1);
        assert!(!computation.running.load(Ordering::SeqCst));
    }

    #[test]
    fn disposed_computation_never_runs() {
        let computation = Computation::new();
        let source = Source::new();
        let observer: Arc<dyn Observer> = RecordingObserver::new();
        computation.register(source.clone(), &observer);

        assert!(computation.dispose());
        assert!(!computation.dispose());
        assert!(source.observers.is_empty());

        computation.run(|| unreachable!()).unwrap();
        computation.register(source.clone(), &observer);
        assert_eq!(computation.dependency_count(), 0);
        assert_eq!(computation.run_count(), 0);
    }
}
