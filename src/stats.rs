//! Optional diagnostics counters.
//!
//! The engine keeps no ambient global state; callers that want profiling
//! numbers build a [`Stats`] and attach it to the shapes they care about.
//! Cloned shapes share the counters of the shape they were cloned from.

use std::cell::Cell;
use std::fmt;

/// Counters for the expensive recomputations.
#[derive(Debug, Default)]
pub struct Stats {
    closures: Cell<u64>,
    reductions: Cell<u64>,
    widenings: Cell<u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of closure runs.
    pub fn closures(&self) -> u64 {
        self.closures.get()
    }
    /// Number of reduction runs.
    pub fn reductions(&self) -> u64 {
        self.reductions.get()
    }
    /// Number of widening applications.
    pub fn widenings(&self) -> u64 {
        self.widenings.get()
    }

    pub(crate) fn note_closure(&self) {
        self.closures.set(self.closures.get() + 1);
    }
    pub(crate) fn note_reduction(&self) {
        self.reductions.set(self.reductions.get() + 1);
    }
    pub(crate) fn note_widening(&self) {
        self.widenings.set(self.widenings.get() + 1);
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "closures: {}, reductions: {}, widenings: {}",
            self.closures(),
            self.reductions(),
            self.widenings()
        )
    }
}
