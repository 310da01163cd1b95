//! Derived-state flags for shapes.
//!
//! A shape keeps several equivalent representations in play: the raw
//! constraint matrix, its shortest-path closure, and the reduced (minimal)
//! form. [`Status`] records which of those are current, so the expensive
//! recomputations run only when a consumer actually needs them.
//!
//! The discipline is conservative: an operation clears every flag it cannot
//! prove it preserves.

use std::fmt;

/// Bit flags over {empty, closed, reduced, universe}.
///
/// # Invariants
///
/// - `reduced` implies `closed`.
/// - `empty` and `universe` are mutually exclusive.
/// - At space dimension zero a shape is exactly `empty` or `universe`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Status(u8);

const EMPTY: u8 = 1 << 0;
const CLOSED: u8 = 1 << 1;
const REDUCED: u8 = 1 << 2;
const UNIVERSE: u8 = 1 << 3;

impl Status {
    /// Status of a freshly built universe shape: no constraints means the
    /// matrix is trivially closed and minimal.
    pub fn universe() -> Self {
        Status(UNIVERSE | CLOSED | REDUCED)
    }

    /// Status of the canonical empty shape.
    pub fn empty() -> Self {
        Status(EMPTY)
    }

    /// Status of a shape with constraints written but nothing derived yet.
    pub fn unclosed() -> Self {
        Status(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 & EMPTY != 0
    }
    pub fn is_closed(self) -> bool {
        self.0 & CLOSED != 0
    }
    pub fn is_reduced(self) -> bool {
        self.0 & REDUCED != 0
    }
    pub fn is_universe(self) -> bool {
        self.0 & UNIVERSE != 0
    }

    /// Installs the terminal empty state.
    pub fn set_empty(&mut self) {
        self.0 = EMPTY;
    }

    pub fn set_closed(&mut self) {
        debug_assert!(!self.is_empty());
        self.0 |= CLOSED;
    }

    pub fn set_reduced(&mut self) {
        debug_assert!(self.is_closed(), "reduction presumes closure");
        self.0 |= REDUCED;
    }

    /// Invalidates the derived forms after a mutation that may have
    /// tightened or loosened entries.
    pub fn clear_derived(&mut self) {
        self.0 &= !(CLOSED | REDUCED | UNIVERSE);
    }

    /// Keeps closure but drops minimality; for mutations that provably
    /// preserve the triangle property while possibly introducing redundancy.
    pub fn clear_reduced(&mut self) {
        self.0 &= !REDUCED;
    }

    /// Ascii token list for the dump format.
    pub fn tokens(self) -> String {
        let mut parts = Vec::new();
        if self.is_empty() {
            parts.push("empty");
        }
        if self.is_closed() {
            parts.push("closed");
        }
        if self.is_reduced() {
            parts.push("reduced");
        }
        if self.is_universe() {
            parts.push("universe");
        }
        if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(" ")
        }
    }

    /// Parses the token list produced by [`Status::tokens`]. Returns `None`
    /// on unknown tokens or flag combinations that violate the invariants.
    pub fn from_tokens(s: &str) -> Option<Status> {
        let mut status = Status(0);
        if s != "-" {
            for token in s.split_whitespace() {
                match token {
                    "empty" => status.0 |= EMPTY,
                    "closed" => status.0 |= CLOSED,
                    "reduced" => status.0 |= REDUCED,
                    "universe" => status.0 |= UNIVERSE,
                    _ => return None,
                }
            }
        }
        if status.is_reduced() && !status.is_closed() {
            return None;
        }
        if status.is_empty() && (status.0 & !EMPTY) != 0 {
            return None;
        }
        Some(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens())
    }
}
