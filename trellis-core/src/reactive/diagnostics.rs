//! Change diagnostics.
//!
//! Every stored cell write is reported to the runtime's [`Diagnostics`] hub,
//! which forwards a [`ChangeEvent`] to each registered hook. Devtools and
//! tests use this to watch the whole graph without subscribing to individual
//! cells.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::graph::NodeId;

/// A single stored write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// The cell that changed.
    pub node: NodeId,
    /// Debug name of the cell, if one was set.
    pub name: Option<String>,
    /// Rust type of the cell's value.
    pub type_name: &'static str,
    /// The new value, rendered by the cell's value formatter if it has one.
    pub value: Option<String>,
    /// The cell's revision after the write.
    pub revision: u64,
}

impl ChangeEvent {
    /// Encode the event as a JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Identifier returned by [`Diagnostics::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Hook = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Global "any cell changed" notification hub for one runtime.
pub struct Diagnostics {
    enabled: bool,
    hooks: DashMap<HookId, Hook>,
    next_hook: AtomicU64,
    changes: AtomicU64,
}

impl Diagnostics {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hooks: DashMap::new(),
            next_hook: AtomicU64::new(0),
            changes: AtomicU64::new(0),
        }
    }

    /// Whether change events are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a hook called after every stored write.
    ///
    /// Hooks may be called from whichever thread applied the write. Their
    /// relative order is unspecified.
    pub fn on_change<F>(&self, hook: F) -> HookId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.insert(id, Arc::new(hook));
        id
    }

    /// Remove a hook. Returns `false` if it was not registered.
    pub fn remove(&self, id: HookId) -> bool {
        self.hooks.remove(&id).is_some()
    }

    /// Total number of stored writes seen.
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, event: impl FnOnce() -> ChangeEvent) {
        if !self.enabled {
            return;
        }
        self.changes.fetch_add(1, Ordering::Relaxed);
        if self.hooks.is_empty() {
            return;
        }

        let event = event();
        let hooks: SmallVec<[Hook; 2]> = self.hooks.iter().map(|h| h.value().clone()).collect();
        for hook in hooks {
            hook(&event);
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.enabled)
            .field("hooks", &self.hooks.len())
            .field("changes", &self.change_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn event(revision: u64) -> ChangeEvent {
        ChangeEvent {
            node: NodeId::new(),
            name: Some("count".into()),
            type_name: "i32",
            value: Some(revision.to_string()),
            revision,
        }
    }

    #[test]
    fn hooks_receive_events() {
        let diagnostics = Diagnostics::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let id = diagnostics.on_change(move |e| s.lock().push(e.revision));

        diagnostics.record(|| event(1));
        assert!(diagnostics.remove(id));
        diagnostics.record(|| event(2));

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(diagnostics.change_count(), 2);
    }

    #[test]
    fn disabled_hub_records_nothing() {
        let diagnostics = Diagnostics::new(false);
        let seen = Arc::new(AtomicU64::new(0));

        let s = seen.clone();
        diagnostics.on_change(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        diagnostics.record(|| event(1));

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(diagnostics.change_count(), 0);
    }

    #[test]
    fn event_serializes_to_json() {
        let e = ChangeEvent {
            node: NodeId::new(),
            name: None,
            type_name: "alloc::string::String",
            value: Some("\"hi\"".into()),
            revision: 3,
        };
        let json = e.to_json().unwrap();
        assert_eq!(
            json,
            format!(
                r#"{{"node":{},"name":null,"type_name":"alloc::string::String","value":"\"hi\"","revision":3}}"#,
                e.node.raw()
            )
        );
    }
}
