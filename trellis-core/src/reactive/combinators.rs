//! Shorthand derived cells over a single source cell.

use super::{Cell, DerivedCell};

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Derive a cell holding `f` applied to this cell's value.
    ///
    /// ```rust
    /// use trellis_core::reactive::{Cell, Runtime};
    ///
    /// let rt = Runtime::new();
    /// let name = Cell::new(&rt, "ada".to_string());
    /// let shout = name.select(|n| n.to_uppercase());
    /// assert_eq!(shout.read(), "ADA");
    /// ```
    pub fn select<R, F>(&self, f: F) -> DerivedCell<R>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let source = self.clone();
        DerivedCell::new(self.runtime(), move || source.with(&f))
    }

    /// Derive the result of the first case whose key equals the value, or
    /// `None` when no case matches.
    pub fn matching<R, I>(&self, cases: I) -> DerivedCell<Option<R>>
    where
        T: PartialEq,
        R: Clone + PartialEq + Send + Sync + 'static,
        I: IntoIterator<Item = (T, R)>,
    {
        let cases: Vec<(T, R)> = cases.into_iter().collect();
        self.select(move |value| {
            cases
                .iter()
                .find(|(key, _)| key == value)
                .map(|(_, result)| result.clone())
        })
    }

    /// Like [`matching`](Self::matching) with a fallback for unmatched
    /// values.
    pub fn matching_or<R, I>(&self, default: R, cases: I) -> DerivedCell<R>
    where
        T: PartialEq,
        R: Clone + PartialEq + Send + Sync + 'static,
        I: IntoIterator<Item = (T, R)>,
    {
        let cases: Vec<(T, R)> = cases.into_iter().collect();
        self.select(move |value| {
            cases
                .iter()
                .find(|(key, _)| key == value)
                .map_or_else(|| default.clone(), |(_, result)| result.clone())
        })
    }
}
