//! Reactive Primitives
//!
//! This module implements the reactive system: cells, derived cells, side
//! effects and sequences, plus the runtime that ties them together.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state. When a cell is read while a
//! derived cell or effect is running, the cell registers that computation as
//! an observer. When the cell's value changes, every observer is invalidated.
//!
//! ## Derived Cells
//!
//! A [`DerivedCell`] holds a value computed from other cells. It re-runs
//! eagerly whenever one of its inputs changes, and only notifies its own
//! observers if the result actually changed.
//!
//! ## Side Effects
//!
//! A [`SideEffect`] re-runs an action whenever the cells it read change. Use
//! it to push reactive state out to something that is not reactive.
//!
//! ## Sequences
//!
//! A [`ReactiveSequence`] is an ordered collection with coarse invalidation:
//! any structural change re-runs everything that read it.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically. While a computation runs it
//! sits on top of the runtime's [`ExecutionContext`], and any cell read in
//! that window registers with it. Each run rebuilds the dependency set from
//! scratch, so conditional reads are tracked precisely.
//!
//! Propagation is synchronous and happens on the runtime's owner thread.
//! Writes from other threads are handed to a [`Dispatcher`].

mod buffered;
mod cell;
mod combinators;
mod computation;
mod context;
mod derived;
mod diagnostics;
mod dispatch;
mod effect;
mod runtime;
mod sequence;

pub use buffered::BufferedCell;
pub use cell::Cell;
pub use context::{ExecutionContext, ObserverScope, UntrackScope};
pub use derived::DerivedCell;
pub use diagnostics::{ChangeEvent, Diagnostics, HookId};
pub use dispatch::{channel, ChannelDispatcher, DispatchQueue, Dispatcher, Job};
pub use effect::SideEffect;
pub use runtime::{Runtime, RuntimeConfig};
pub use sequence::{ReactiveSequence, SequenceChange};
