//! Graph Nodes
//!
//! Node identity and the two capability traits every participant in the
//! dependency graph implements.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;

/// Unique identifier for a node in the dependency graph.
///
/// Cells, sequences, derived cells and side effects each get one when
/// created. Ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Something an [`Observer`] can read and subscribe to.
///
/// A dependency keeps a non-owning registry of its observers and invalidates
/// them when it changes.
pub trait Dependency: Send + Sync {
    /// Identity of this dependency.
    fn node_id(&self) -> NodeId;

    /// Add `observer` to the registry. Subscribing twice is a no-op.
    fn subscribe(&self, observer: &Arc<dyn Observer>);

    /// Remove the observer with the given id. Unknown ids are ignored.
    fn unsubscribe(&self, observer: NodeId);
}

/// A computation that reads dependencies and is invalidated when they change.
pub trait Observer: Send + Sync {
    /// Identity of this observer.
    fn node_id(&self) -> NodeId;

    /// Called when one of the observer's dependencies changed.
    ///
    /// Errors from the re-run propagate back to whoever wrote the dependency.
    fn on_state_changed(&self) -> Result<()>;

    /// Record that `dependency` was read while this observer was running.
    fn register_dependency(&self, dependency: Arc<dyn Dependency>);
}
