//! Error types for the reactive core.

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error returned by user computations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by the reactive graph.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derived cell or side effect returned an error from its function.
    ///
    /// The node keeps its previous value and stays subscribed to whatever it
    /// read before failing, so a later change to one of those inputs retries.
    #[error("computation {node} failed: {source}")]
    Compute {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// A sequence mutation addressed an index that does not exist.
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The node was disposed before it produced a value.
    #[error("{node} has been disposed")]
    Disposed { node: NodeId },
}

impl ReactiveError {
    /// The node the error originated from, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Compute { node, .. } | Self::Disposed { node } => Some(*node),
            Self::IndexOutOfBounds { .. } => None,
        }
    }
}
