//! # oct-rs: weakly-relational numeric domains in Rust
//!
//! **`oct-rs`** is a library of **bounded-difference and octagonal shapes**:
//! convex sets of rational or integer points described by constraints of the
//! forms `±x <= c`, `x - y <= c` and (octagons only) `x + y <= c`.
//! It is designed for static analysis and abstract interpretation.
//!
//! ## What is a shape?
//!
//! A shape stores its constraints in a matrix of exact extended-rational
//! bounds and keeps that matrix in a **canonical closed form**: all-pairs
//! shortest paths make every implied bound explicit, so emptiness,
//! containment and equality become cheap matrix comparisons. The canonical
//! form is maintained lazily and invalidated by mutation, the way a
//! computed table gates recomputation in a decision-diagram manager.
//!
//! ## Key Features
//!
//! - **Exact arithmetic**: bounds are arbitrary-precision rationals with
//!   ±∞; arithmetic saturates instead of overflowing, so precision loss is
//!   always sound and never an error.
//! - **Copy-on-write values**: cloning a shape shares its matrix; mutations
//!   take unique ownership first. Cheap to pass around, safe to fork.
//! - **Full dimension surgery**: embed, project, remove, fold, expand,
//!   concatenate, and rename dimensions, with eager validation.
//! - **Fixpoint tooling**: widening (standard, token-bounded, and
//!   constraint-guided) and narrowing operators with the usual termination
//!   guarantees.
//! - **Integer octagons**: with [`CoeffKind::Integer`][crate::shape::CoeffKind]
//!   the closure tightens bounds to the nearest feasible integer.
//!
//! ## Basic Usage
//!
//! ```rust
//! use oct_rs::constraint::{Constraint, LinForm, Rel};
//! use oct_rs::shape::{CoeffKind, Shape, Topology};
//! use oct_rs::types::Var;
//!
//! let x = Var::new(0);
//! let y = Var::new(1);
//!
//! // 1. Build a shape over two dimensions.
//! let mut shape = Shape::universe(Topology::Octagon, CoeffKind::Rational, 2).unwrap();
//!
//! // 2. Constrain it: x <= 1, x + y <= 3.
//! shape
//!     .add_constraints(&[
//!         Constraint::new_int(LinForm::Plus(x), Rel::Le, 1).unwrap(),
//!         Constraint::new_int(LinForm::Sum(x, y), Rel::Le, 3).unwrap(),
//!     ])
//!     .unwrap();
//!
//! // 3. Query it; closure runs on demand.
//! assert!(!shape.is_empty());
//! let other = shape.clone();
//! assert!(shape.contains(&other).unwrap());
//!
//! // 4. Read the constraints back.
//! assert_eq!(shape.minimized_constraints().len(), 2);
//! ```
//!
//! ## Core Components
//!
//! - **[`shape`]**: the heart of the library — the [`Shape`][crate::shape::Shape]
//!   manager with closure, lattice operations, dimension surgery, and
//!   affine images.
//! - **[`constraint`]**: the restricted two-variable constraint fragment.
//! - **[`bound`]**: exact rational bounds extended with ±∞.
//! - **[`boxdom`]**: per-dimension interval boxes for fast construction and
//!   widening guidance.
//!
//! Shapes are single-threaded values (`!Sync` by construction); use
//! independent shapes per thread.

pub mod bound;
pub mod boxdom;
pub mod constraint;
pub mod errors;
pub mod shape;
pub mod stats;
pub mod types;
pub mod varset;

mod closure;
mod dump;
mod extrapolate;
mod matrix;
mod status;
