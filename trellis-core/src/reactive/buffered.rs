//! Buffered cells: edit a copy, then commit or discard.
//!
//! A [`BufferedCell`] owns a private cell seeded from a source cell. Writes
//! land in the buffer only, so observers of the source see nothing until
//! [`commit`](BufferedCell::commit). Typical use is an edit form bound to the
//! buffer, with save and cancel mapped to `commit` and `reset`.

use std::fmt::{self, Debug};

use tracing::trace;

use super::Cell;
use crate::error::Result;

/// A cell that stages writes for a source cell.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Cell, Runtime};
///
/// let rt = Runtime::new();
/// let name = Cell::new(&rt, "Ada".to_string());
/// let draft = name.to_buffered();
///
/// draft.write("Grace".to_string()).unwrap();
/// assert_eq!(name.read(), "Ada");
///
/// draft.commit().unwrap();
/// assert_eq!(name.read(), "Grace");
/// ```
pub struct BufferedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    source: Cell<T>,
    buffer: Cell<T>,
}

impl<T> BufferedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a buffer holding the source's current value. Reading the
    /// source here is not tracked.
    pub fn new(source: &Cell<T>) -> Self {
        let buffer = Cell::from_parts(
            source.runtime().clone(),
            source.read_untracked(),
            source.comparer(),
        );
        Self {
            source: source.clone(),
            buffer,
        }
    }

    /// The buffered value.
    pub fn read(&self) -> T {
        self.buffer.read()
    }

    /// Stage a value. The source is untouched.
    pub fn write(&self, value: T) -> Result<()> {
        self.buffer.write(value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.buffer.update(f)
    }

    /// Discard staged changes by copying the source into the buffer.
    pub fn reset(&self) -> Result<()> {
        trace!(source = %self.source.node_id(), "buffer reset");
        self.buffer.write(self.source.read_untracked())
    }

    /// Write the buffered value to the source.
    pub fn commit(&self) -> Result<()> {
        trace!(source = %self.source.node_id(), "buffer committed");
        self.source.write(self.buffer.read_untracked())
    }

    /// Whether the buffer differs from the source. Tracks both.
    pub fn is_dirty(&self) -> bool {
        let equals = self.buffer.comparer();
        let staged = self.buffer.read();
        let current = self.source.read();
        !equals(&staged, &current)
    }

    /// The buffer as a plain cell, for binding.
    pub fn as_cell(&self) -> &Cell<T> {
        &self.buffer
    }

    pub fn source(&self) -> &Cell<T> {
        &self.source
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a [`BufferedCell`] staging writes for this cell.
    pub fn to_buffered(&self) -> BufferedCell<T> {
        BufferedCell::new(self)
    }
}

impl<T> Clone for BufferedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

impl<T> Debug for BufferedCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedCell")
            .field("source", &self.source)
            .field("buffer", &self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{DerivedCell, Runtime};

    #[test]
    fn writes_stay_in_buffer_until_commit() {
        let rt = Runtime::new();
        let source = Cell::new(&rt, 1);
        let buffered = source.to_buffered();

        buffered.write(2).unwrap();
        assert_eq!(buffered.read(), 2);
        assert_eq!(source.read(), 1);
        assert!(buffered.is_dirty());

        buffered.commit().unwrap();
        assert_eq!(source.read(), 2);
        assert!(!buffered.is_dirty());
    }

    #[test]
    fn reset_discards_staged_value() {
        let rt = Runtime::new();
        let source = Cell::new(&rt, "saved".to_string());
        let buffered = BufferedCell::new(&source);

        buffered.write("draft".to_string()).unwrap();
        buffered.reset().unwrap();
        assert_eq!(buffered.read(), "saved");

        // Picks up source changes made after creation
        source.write("newer".to_string()).unwrap();
        assert_eq!(buffered.read(), "saved");
        buffered.reset().unwrap();
        assert_eq!(buffered.read(), "newer");
    }

    #[test]
    fn dirty_flag_is_reactive() {
        let rt = Runtime::new();
        let source = Cell::new(&rt, 0);
        let buffered = source.to_buffered();

        let b = buffered.clone();
        let can_save = DerivedCell::new(&rt, move || b.is_dirty());
        assert!(!can_save.read());

        buffered.write(5).unwrap();
        assert!(can_save.read());

        buffered.commit().unwrap();
        assert!(!can_save.read());
    }

    #[test]
    fn buffer_uses_source_comparer() {
        let rt = Runtime::new();
        let source = Cell::with_comparer(&rt, 10, |a: &i32, b: &i32| a / 10 == b / 10);
        let buffered = source.to_buffered();

        buffered.write(15).unwrap();
        assert_eq!(buffered.read(), 10);
        assert!(!buffered.is_dirty());
    }
}
