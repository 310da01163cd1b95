//! Type-safe wrappers for variables and matrix occurrence indices.
//!
//! This module provides newtype wrappers that enforce compile-time
//! distinction between variable ids and the signed occurrence indices used
//! to address octagon matrices, preventing common index-mixup mistakes in
//! matrix manipulation code.

use std::fmt;

/// The largest supported space dimension.
///
/// Chosen so that every occurrence index of an octagon matrix fits in a
/// `u32` with room to spare; operations that would push a shape past this
/// ceiling fail with `Error::MaxDimension` instead of wrapping.
pub const MAX_SPACE_DIM: usize = (u32::MAX as usize - 2) / 2;

/// A variable identifier (0-indexed).
///
/// Variables are stable small integers: a shape over dimension `n`
/// constrains `Var::new(0) .. Var::new(n-1)`, and dimension surgery
/// renumbers them contiguously. They carry no identity beyond the index,
/// so shapes can be dumped and compared without pointer concerns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// Creates a new variable with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` exceeds [`MAX_SPACE_DIM`].
    pub fn new(id: usize) -> Self {
        assert!(id <= MAX_SPACE_DIM, "Variable id {} is too large", id);
        Var(id as u32)
    }

    /// Returns the raw variable id.
    pub fn id(self) -> usize {
        self.0 as usize
    }

    /// The positive occurrence of this variable.
    pub fn pos(self) -> Occ {
        Occ(self.0 * 2)
    }

    /// The negated occurrence of this variable.
    pub fn neg(self) -> Occ {
        Occ(self.0 * 2 + 1)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<Var> for usize {
    fn from(var: Var) -> Self {
        var.id()
    }
}

/// A signed variable occurrence: an index into an octagon matrix.
///
/// Variable `v` owns two adjacent occurrences, `pos(v) = 2v` standing for
/// `+v` and `neg(v) = 2v + 1` standing for `-v`. [`Occ::bar`] flips between
/// them; it is the negated-mirror map that octagon coherence is phrased in,
/// and it is involutive by construction (xor on the low bit).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Occ(u32);

impl Occ {
    /// Creates an occurrence from a raw matrix index.
    pub fn from_index(index: usize) -> Self {
        Occ(index as u32)
    }

    /// The matrix index of this occurrence.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The mirror occurrence: `+v` for `-v` and vice versa.
    pub fn bar(self) -> Occ {
        Occ(self.0 ^ 1)
    }

    /// The variable this occurrence belongs to.
    pub fn var(self) -> Var {
        Var(self.0 / 2)
    }

    /// True for the negated occurrence `-v`.
    pub fn is_neg(self) -> bool {
        self.0 & 1 == 1
    }
}

impl fmt::Display for Occ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.is_neg() { "-" } else { "+" },
            self.var()
        )
    }
}
