//! Dependency Graph
//!
//! The graph primitives shared by every reactive node.
//!
//! # Overview
//!
//! The graph is directed: an [`Observer`] (derived cell, side effect, or a
//! binding in the UI layer) reads one or more [`Dependency`] values (cells,
//! sequences). Edges are stored on both ends with different ownership:
//!
//! - Observer → Dependency is owning (`Arc<dyn Dependency>`). It drives
//!   unsubscription when the observer re-runs or is disposed.
//! - Dependency → Observer is a non-owning registry (`Weak<dyn Observer>`,
//!   see [`ObserverSet`]) used only to fan out invalidation.
//!
//! No node ever holds a strong reference to its observers, so dropping the
//! last handle to an observer is enough to detach it from the graph.

mod node;
mod registry;

pub use node::{Dependency, NodeId, Observer};
pub use registry::{ListenerId, ListenerSet, ObserverSet, ObserverSnapshot};

#[cfg(test)]
pub(crate) mod recording;
