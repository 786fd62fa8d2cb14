//! Execution Context
//!
//! The execution context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read, the
//! current computation registers it as a dependency.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one context. Inside it, every thread
//! that touches the graph gets its own [`Frame`]: a stack of running
//! observers, an untrack counter and the batch bookkeeping. Frames are created
//! on first use and dropped once the thread goes idle again.
//!
//! Entering a computation returns a guard that pops the stack when dropped,
//! so the stack stays balanced even if the computation panics.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::graph::{NodeId, Observer};

/// Per-thread tracking state.
#[derive(Default)]
struct Frame {
    stack: Vec<Arc<dyn Observer>>,
    untrack_depth: usize,
    batch_depth: usize,
    dirty: IndexMap<NodeId, Arc<dyn Observer>>,
}

impl Frame {
    fn is_idle(&self) -> bool {
        self.stack.is_empty()
            && self.untrack_depth == 0
            && self.batch_depth == 0
            && self.dirty.is_empty()
    }
}

/// Who is computing right now, and whether reads should be tracked.
#[derive(Default)]
pub struct ExecutionContext {
    frames: DashMap<ThreadId, Frame>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `observer` as the current computation of this thread.
    ///
    /// The observer is popped when the returned guard is dropped.
    pub fn push(&self, observer: Arc<dyn Observer>) -> ObserverScope<'_> {
        let observer_id = observer.node_id();
        self.with_frame(|frame| frame.stack.push(observer));
        ObserverScope {
            context: self,
            observer_id,
        }
    }

    /// The observer that should receive dependency registrations, if any.
    ///
    /// Returns `None` when no computation is running on this thread or an
    /// untrack scope is active.
    pub fn current(&self) -> Option<Arc<dyn Observer>> {
        let frame = self.frames.get(&thread::current().id())?;
        if frame.untrack_depth > 0 {
            return None;
        }
        frame.stack.last().cloned()
    }

    /// Number of observers on this thread's stack.
    pub fn depth(&self) -> usize {
        self.frames
            .get(&thread::current().id())
            .map_or(0, |frame| frame.stack.len())
    }

    /// Suspend tracking until the returned guard is dropped. Nests.
    pub fn push_untrack(&self) -> UntrackScope<'_> {
        self.with_frame(|frame| frame.untrack_depth += 1);
        UntrackScope { context: self }
    }

    /// Current untrack nesting depth on this thread.
    pub fn untrack_depth(&self) -> usize {
        self.frames
            .get(&thread::current().id())
            .map_or(0, |frame| frame.untrack_depth)
    }

    /// Run `f` with tracking forced on, even inside an untrack scope.
    ///
    /// The previous untrack depth is restored afterwards, including when `f`
    /// panics.
    pub fn force_track<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = self.with_frame(|frame| std::mem::take(&mut frame.untrack_depth));
        let _restore = RestoreUntrack {
            context: self,
            depth: saved,
        };
        f()
    }

    /// Enter a batch scope. Returns the new batch depth.
    pub fn push_batch(&self) -> usize {
        self.with_frame(|frame| {
            frame.batch_depth += 1;
            frame.batch_depth
        })
    }

    /// Leave a batch scope.
    ///
    /// When the outermost batch ends, returns the observers queued during it,
    /// deduplicated and in first-registration order. Inner scopes return
    /// `None`.
    pub fn pop_batch(&self) -> Option<Vec<Arc<dyn Observer>>> {
        let drained = self.with_frame(|frame| {
            frame.batch_depth = frame.batch_depth.saturating_sub(1);
            if frame.batch_depth > 0 {
                return None;
            }
            Some(frame.dirty.drain(..).map(|(_, observer)| observer).collect())
        });
        self.release_if_idle();
        drained
    }

    /// Remove and return the oldest queued observer, leaving the batch depth
    /// untouched. Observers still queued keep deduplicating new registrations.
    pub fn take_next_dirty(&self) -> Option<Arc<dyn Observer>> {
        self.with_frame(|frame| frame.dirty.shift_remove_index(0).map(|(_, observer)| observer))
    }

    /// Whether a batch scope is active on this thread.
    pub fn is_batching(&self) -> bool {
        self.frames
            .get(&thread::current().id())
            .is_some_and(|frame| frame.batch_depth > 0)
    }

    /// Queue `observer` for notification when the current batch ends.
    ///
    /// Returns `false` if it was already queued.
    pub fn register_dirty(&self, observer: Arc<dyn Observer>) -> bool {
        self.with_frame(|frame| {
            let id = observer.node_id();
            if frame.dirty.contains_key(&id) {
                return false;
            }
            frame.dirty.insert(id, observer);
            true
        })
    }

    fn pop(&self, expected: NodeId) {
        let popped = self.with_frame(|frame| frame.stack.pop());

        // Verify we're popping the right observer.
        // This helps catch bugs where scopes are dropped out of order.
        if let Some(observer) = &popped {
            debug_assert_eq!(
                observer.node_id(),
                expected,
                "ExecutionContext mismatch: expected {:?}, got {:?}",
                expected,
                observer.node_id()
            );
        }

        // Drop the observer only after the frame lock is released; it may be
        // the last handle to a node whose teardown touches other dependencies.
        drop(popped);
        self.release_if_idle();
    }

    fn pop_untrack(&self) {
        self.with_frame(|frame| frame.untrack_depth = frame.untrack_depth.saturating_sub(1));
        self.release_if_idle();
    }

    fn with_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> R {
        let mut frame = self.frames.entry(thread::current().id()).or_default();
        f(&mut frame)
    }

    fn release_if_idle(&self) {
        self.frames
            .remove_if(&thread::current().id(), |_, frame| frame.is_idle());
    }
}

/// Guard returned by [`ExecutionContext::push`].
pub struct ObserverScope<'a> {
    context: &'a ExecutionContext,
    observer_id: NodeId,
}

impl Drop for ObserverScope<'_> {
    fn drop(&mut self) {
        self.context.pop(self.observer_id);
    }
}

/// Guard returned by [`ExecutionContext::push_untrack`].
pub struct UntrackScope<'a> {
    context: &'a ExecutionContext,
}

impl Drop for UntrackScope<'_> {
    fn drop(&mut self) {
        self.context.pop_untrack();
    }
}

struct RestoreUntrack<'a> {
    context: &'a ExecutionContext,
    depth: usize,
}

impl Drop for RestoreUntrack<'_> {
    fn drop(&mut self) {
        let depth = self.depth;
        self.context.with_frame(|frame| frame.untrack_depth = depth);
        self.context.release_if_idle();
    }
}
