//! Trellis Core
//!
//! This crate provides the reactive core of the Trellis UI framework. It
//! implements:
//!
//! - Reactive primitives (cells, derived cells, side effects, sequences)
//! - Automatic, per-run dependency tracking
//! - Batched, deduplicated propagation
//! - Owner-thread confinement with cross-thread write marshalling
//!
//! # Architecture
//!
//! The crate is organized into a few modules:
//!
//! - `graph`: node identity, the `Dependency`/`Observer` roles, and the
//!   registries that connect them
//! - `reactive`: the runtime and the reactive primitives built on the graph
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use trellis_core::reactive::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a cell
//! let count = rt.cell(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = rt.derived(move || c.read() * 2);
//!
//! // Create an effect
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (c, d, l) = (count.clone(), doubled.clone(), log.clone());
//! let _effect = rt.effect(move || {
//!     l.lock().unwrap().push(format!("count: {}, doubled: {}", c.read(), d.read()));
//! });
//!
//! // Update the cell; the effect runs again
//! count.write(5).unwrap();
//! assert_eq!(log.lock().unwrap().last().unwrap(), "count: 5, doubled: 10");
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{BoxError, ReactiveError, Result};
pub use reactive::{
    BufferedCell, Cell, DerivedCell, ReactiveSequence, Runtime, RuntimeConfig, SideEffect,
};
