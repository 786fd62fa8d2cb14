//! Test-only observer that counts invalidations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Dependency, NodeId, Observer};
use crate::error::Result;

pub(crate) struct RecordingObserver {
    id: NodeId,
    calls: AtomicUsize,
    dependencies: Mutex<Vec<NodeId>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new(),
            calls: AtomicUsize::new(0),
            dependencies: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn dependencies(&self) -> Vec<NodeId> {
        self.dependencies.lock().clone()
    }
}

impl Observer for RecordingObserver {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn on_state_changed(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register_dependency(&self, dependency: Arc<dyn Dependency>) {
        self.dependencies.lock().push(dependency.node_id());
    }
}
