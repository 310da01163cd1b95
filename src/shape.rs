//! The shape manager: weakly-relational sets of rational or integer points.
//!
//! A [`Shape`] represents a convex set definable by bounded-difference
//! (`±x <= c`, `x - y <= c`) or octagonal (additionally `x + y <= c`)
//! constraints over `dim` variables, stored as a matrix of [`Bound`]s.
//!
//! Shapes are single-threaded values with copy-on-write backing: cloning a
//! shape shares the matrix behind an `Rc`, and every mutation first ensures
//! unique ownership. Derived representations (closure, reduction) are
//! computed lazily when a query needs them and cached until the next
//! mutation; concurrent mutation of one logically shared shape is not a
//! supported use (the type is deliberately `!Sync`).
//!
//! # Matrix conventions
//!
//! Entry `(i, j)` bounds `val(i) - val(j)`.
//!
//! - Bounded differences use `dim + 1` nodes, node 0 being the implicit
//!   zero anchor: `val(v + 1) = x_v`, so `x_v <= c` lives at `(v+1, 0)`.
//! - Octagons use `2 * dim` nodes: `val(2v) = x_v` and `val(2v+1) = -x_v`,
//!   so a unary bound `x_v <= c` lives doubled at `(2v, 2v+1)`. Every
//!   relational cell is written together with its negated mirror, keeping
//!   the coherence invariant `m[i][j] == m[bar(j)][bar(i)]`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::debug;
use num_rational::BigRational;

use crate::bound::Bound;
use crate::boxdom::{BoundBox, Interval};
use crate::closure;
use crate::constraint::{Constraint, LinForm, Rel};
use crate::errors::Error;
use crate::matrix::SquareMatrix;
use crate::stats::Stats;
use crate::status::Status;
use crate::types::{Occ, Var, MAX_SPACE_DIM};
use crate::varset::VarSet;

/// Which constraint fragment a shape can represent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Topology {
    /// `±x <= c` and `x - y <= c`.
    BoundedDifference,
    /// Additionally `x + y <= c` and `-x - y <= c`.
    Octagon,
}

/// Coefficient universe of a shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoeffKind {
    /// Exact rationals.
    Rational,
    /// Integers: bounds are kept integral and octagon closure tightens
    /// unary bounds to the nearest feasible integer (rounding toward -∞).
    Integer,
}

/// Sign of the variable term in an [`AffineForm`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sign {
    Pos,
    Neg,
}

/// Right-hand side of a single-variable assignment: `±w + [lo, hi]`, or
/// just the interval `[lo, hi]` when no variable is involved.
///
/// The interval models a possibly non-invertible result: `x := x + [0, 1]`
/// says `x` grows by anything up to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffineForm {
    var: Option<(Sign, Var)>,
    lo: Bound,
    hi: Bound,
}

impl AffineForm {
    /// `[lo, hi]`.
    pub fn interval(lo: Bound, hi: Bound) -> Self {
        Self { var: None, lo, hi }
    }

    /// The exact constant `c`.
    pub fn constant(c: BigRational) -> Self {
        let b = Bound::Finite(c);
        Self {
            var: None,
            lo: b.clone(),
            hi: b,
        }
    }

    /// `±w`.
    pub fn var(sign: Sign, var: Var) -> Self {
        Self::var_offset(sign, var, Bound::zero(), Bound::zero())
    }

    /// `±w + [lo, hi]`.
    pub fn var_offset(sign: Sign, var: Var, lo: Bound, hi: Bound) -> Self {
        Self {
            var: Some((sign, var)),
            lo,
            hi,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct State {
    pub(crate) status: Status,
    pub(crate) matrix: Rc<SquareMatrix>,
    /// Canonical minimal form, cached while the `reduced` flag holds.
    pub(crate) reduced: Option<Rc<SquareMatrix>>,
}

impl State {
    pub(crate) fn clear_derived(&mut self) {
        self.status.clear_derived();
        self.reduced = None;
    }
}

/// A bounded-difference or octagonal shape. See the module docs for the
/// representation.
pub struct Shape {
    topology: Topology,
    coeff: CoeffKind,
    dim: usize,
    state: RefCell<State>,
    stats: Option<Rc<Stats>>,
}

impl Clone for Shape {
    fn clone(&self) -> Self {
        // Cheap: the matrix is shared until one of the clones mutates.
        Shape {
            topology: self.topology,
            coeff: self.coeff,
            dim: self.dim,
            state: RefCell::new(self.state.borrow().clone()),
            stats: self.stats.clone(),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Shape")
            .field("topology", &self.topology)
            .field("coeff", &self.coeff)
            .field("dim", &self.dim)
            .field("status", &st.status.tokens())
            .finish()
    }
}

// ─── Construction ───

impl Shape {
    fn node_count(topology: Topology, dim: usize) -> usize {
        match topology {
            Topology::BoundedDifference => dim + 1,
            Topology::Octagon => 2 * dim,
        }
    }

    fn with_state(topology: Topology, coeff: CoeffKind, dim: usize, status: Status) -> Self {
        let nodes = Self::node_count(topology, dim);
        Shape {
            topology,
            coeff,
            dim,
            state: RefCell::new(State {
                status,
                matrix: Rc::new(SquareMatrix::universe(nodes)),
                reduced: None,
            }),
            stats: None,
        }
    }

    fn check_dim(dim: usize) -> Result<(), Error> {
        if dim > MAX_SPACE_DIM {
            return Err(Error::MaxDimension { requested: dim });
        }
        Ok(())
    }

    /// The unconstrained shape over `dim` dimensions.
    pub fn universe(topology: Topology, coeff: CoeffKind, dim: usize) -> Result<Self, Error> {
        Self::check_dim(dim)?;
        Ok(Self::with_state(topology, coeff, dim, Status::universe()))
    }

    /// The empty shape over `dim` dimensions.
    pub fn empty(topology: Topology, coeff: CoeffKind, dim: usize) -> Result<Self, Error> {
        Self::check_dim(dim)?;
        Ok(Self::with_state(topology, coeff, dim, Status::empty()))
    }

    /// Builds a shape from a constraint list.
    pub fn from_constraints(
        topology: Topology,
        coeff: CoeffKind,
        dim: usize,
        constraints: &[Constraint],
    ) -> Result<Self, Error> {
        let mut shape = Self::universe(topology, coeff, dim)?;
        shape.add_constraints(constraints)?;
        Ok(shape)
    }

    /// Builds a shape from a box, one interval per dimension. This is a
    /// direct-write fast path: no constraint objects, no insertion loop.
    ///
    /// The domain is non-strict, so an open finite side is widened to its
    /// closed bound (rational coefficients) or tightened by one (integer
    /// coefficients, where this is exact).
    pub fn from_box(topology: Topology, coeff: CoeffKind, b: &BoundBox) -> Result<Self, Error> {
        let dim = b.dim();
        let mut shape = Self::universe(topology, coeff, dim)?;
        if b.is_empty() {
            return Shape::empty(topology, coeff, dim);
        }
        let integer = coeff == CoeffKind::Integer;
        let mut writes: Vec<(Vec<(usize, usize)>, Bound)> = Vec::new();
        for v in 0..dim {
            let var = Var::new(v);
            let itv = b.interval(var);
            if let Bound::Finite(hi) = itv.hi() {
                let mut hi = hi.clone();
                if !itv.hi_closed() && integer && itv.hi().is_integral() {
                    hi -= BigRational::from_integer(1.into());
                }
                writes.push(shape.atom_cells(LinForm::Plus(var), &hi)?);
            }
            if let Bound::Finite(lo) = itv.lo() {
                let mut lo = lo.clone();
                if !itv.lo_closed() && integer && itv.lo().is_integral() {
                    lo += BigRational::from_integer(1.into());
                }
                writes.push(shape.atom_cells(LinForm::Minus(var), &-lo)?);
            }
        }
        {
            let mut st = shape.state.borrow_mut();
            let m = Rc::make_mut(&mut st.matrix);
            for (cells, value) in writes {
                for (i, j) in cells {
                    m.tighten(i, j, &value);
                }
            }
            st.clear_derived();
        }
        Ok(shape)
    }
}

// ─── Accessors ───

impl Shape {
    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn coeff_kind(&self) -> CoeffKind {
        self.coeff
    }

    /// The space dimension (number of variables).
    pub fn space_dim(&self) -> usize {
        self.dim
    }

    /// Attaches diagnostics counters; clones of this shape share them.
    pub fn attach_stats(&mut self, stats: Rc<Stats>) {
        self.stats = Some(stats);
    }

    pub(crate) fn nodes(&self) -> usize {
        Self::node_count(self.topology, self.dim)
    }

    pub(crate) fn state(&self) -> &RefCell<State> {
        &self.state
    }

    pub(crate) fn is_octagon(&self) -> bool {
        self.topology == Topology::Octagon
    }

    pub(crate) fn note_widening(&self) {
        if let Some(stats) = &self.stats {
            stats.note_widening();
        }
    }

    pub(crate) fn check_compat(&self, other: &Shape, what: &str) -> Result<(), Error> {
        if self.topology != other.topology || self.coeff != other.coeff {
            return Err(Error::Dimension(format!(
                "{}: incompatible shape kinds ({:?}/{:?} vs {:?}/{:?})",
                what, self.topology, self.coeff, other.topology, other.coeff
            )));
        }
        if self.dim != other.dim {
            return Err(Error::Dimension(format!(
                "{}: space dimensions differ ({} vs {})",
                what, self.dim, other.dim
            )));
        }
        Ok(())
    }

    pub(crate) fn from_raw_parts(
        topology: Topology,
        coeff: CoeffKind,
        dim: usize,
        status: Status,
        matrix: SquareMatrix,
    ) -> Self {
        debug_assert_eq!(matrix.n(), Self::node_count(topology, dim));
        Shape {
            topology,
            coeff,
            dim,
            state: RefCell::new(State {
                status,
                matrix: Rc::new(matrix),
                reduced: None,
            }),
            stats: None,
        }
    }
}

// ─── Constraint bridge ───

impl Shape {
    /// Maps an upper-bound atom `form <= rhs` to its matrix cells and the
    /// stored bound value (doubled for octagon unary bounds, floored for
    /// integer coefficients). Validation only; no mutation.
    pub(crate) fn atom_cells(
        &self,
        form: LinForm,
        rhs: &BigRational,
    ) -> Result<(Vec<(usize, usize)>, Bound), Error> {
        let (a, b) = form.vars();
        let out_of_space = |v: Var| {
            Error::Dimension(format!(
                "{} is outside the {}-dimensional space",
                v, self.dim
            ))
        };
        if a.id() >= self.dim {
            return Err(out_of_space(a));
        }
        if let Some(b) = b {
            if b.id() >= self.dim {
                return Err(out_of_space(b));
            }
        }
        if form.is_sum() && self.topology == Topology::BoundedDifference {
            return Err(Error::Representation(format!(
                "{} is not a bounded-difference constraint",
                form
            )));
        }

        let mut value = Bound::Finite(rhs.clone());
        if self.coeff == CoeffKind::Integer {
            value = value.floor();
        }
        let cells = match self.topology {
            Topology::BoundedDifference => {
                let cell = match form {
                    LinForm::Plus(v) => (v.id() + 1, 0),
                    LinForm::Minus(v) => (0, v.id() + 1),
                    LinForm::Diff(x, y) => (x.id() + 1, y.id() + 1),
                    LinForm::Sum(..) | LinForm::NegSum(..) => unreachable!(),
                };
                vec![cell]
            }
            Topology::Octagon => match form {
                LinForm::Plus(v) => {
                    value = value.double();
                    vec![(v.pos().index(), v.neg().index())]
                }
                LinForm::Minus(v) => {
                    value = value.double();
                    vec![(v.neg().index(), v.pos().index())]
                }
                LinForm::Diff(x, y) => vec![
                    (x.pos().index(), y.pos().index()),
                    (y.neg().index(), x.neg().index()),
                ],
                LinForm::Sum(x, y) => vec![
                    (x.pos().index(), y.neg().index()),
                    (y.pos().index(), x.neg().index()),
                ],
                LinForm::NegSum(x, y) => vec![
                    (x.neg().index(), y.pos().index()),
                    (y.neg().index(), x.pos().index()),
                ],
            },
        };
        Ok((cells, value))
    }

    /// Adds one constraint. The whole constraint is validated before any
    /// cell is written; on error the shape is unchanged.
    pub fn add_constraint(&mut self, c: &Constraint) -> Result<(), Error> {
        self.add_constraints(std::slice::from_ref(c))
    }

    /// Adds a list of constraints atomically: either all are applied or
    /// none.
    pub fn add_constraints(&mut self, constraints: &[Constraint]) -> Result<(), Error> {
        let mut writes = Vec::new();
        for c in constraints {
            for (form, rhs) in c.upper_atoms() {
                writes.push(self.atom_cells(form, &rhs)?);
            }
        }
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() {
            // Nothing can make an empty shape less empty.
            return Ok(());
        }
        if writes.is_empty() {
            return Ok(());
        }
        let m = Rc::make_mut(&mut st.matrix);
        let mut changed = false;
        for (cells, value) in writes {
            for (i, j) in cells {
                changed |= m.tighten(i, j, &value);
            }
        }
        if changed {
            st.clear_derived();
        }
        Ok(())
    }

    /// Reads the current constraint list off the matrix. Redundant entries
    /// are included; use [`Shape::minimized_constraints`] for the minimal
    /// list.
    ///
    /// An empty shape of dimension >= 1 yields a canonical unsatisfiable
    /// pair on `x0`; the empty shape of dimension 0 cannot be expressed as
    /// constraints at all (use [`Shape::is_empty`], or the dump format,
    /// which is faithful).
    pub fn constraints(&self) -> Vec<Constraint> {
        let st = self.state.borrow();
        if st.status.is_empty() {
            return self.falsity();
        }
        self.read_constraints(&st.matrix)
    }

    /// Closure plus reduction, then the minimal constraint list.
    pub fn minimized_constraints(&self) -> Vec<Constraint> {
        self.reduce();
        let st = self.state.borrow();
        if st.status.is_empty() {
            return self.falsity();
        }
        match &st.reduced {
            Some(m) => self.read_constraints(m),
            None => self.read_constraints(&st.matrix),
        }
    }

    fn falsity(&self) -> Vec<Constraint> {
        if self.dim == 0 {
            return Vec::new();
        }
        let x0 = Var::new(0);
        vec![
            Constraint::new_int(LinForm::Plus(x0), Rel::Le, -1).unwrap(),
            Constraint::new_int(LinForm::Minus(x0), Rel::Le, 0).unwrap(),
        ]
    }

    fn read_constraints(&self, m: &SquareMatrix) -> Vec<Constraint> {
        let mut out = Vec::new();
        let n = m.n();
        match self.topology {
            Topology::BoundedDifference => {
                for i in 0..n {
                    for j in i + 1..n {
                        self.emit_pair_bd(m, i, j, &mut out);
                    }
                }
            }
            Topology::Octagon => {
                for i in 0..n {
                    for j in i + 1..n {
                        // A cell and its mirror are the same constraint:
                        // emit from the lexicographically smaller pair.
                        let mi = Occ::from_index(j).bar().index();
                        let mj = Occ::from_index(i).bar().index();
                        let mirror = (mi.min(mj), mi.max(mj));
                        if (i, j) > mirror {
                            continue;
                        }
                        self.emit_pair_oct(m, i, j, &mut out);
                    }
                }
            }
        }
        out
    }

    /// Emits the constraints held by the unordered node pair `{i, j}` of a
    /// bounded-difference matrix.
    fn emit_pair_bd(&self, m: &SquareMatrix, i: usize, j: usize, out: &mut Vec<Constraint>) {
        debug_assert!(j > i);
        let upper = m.at(j, i); // val(j) - val(i) <= upper
        let lower = m.at(i, j);
        let form = if i == 0 {
            LinForm::Plus(Var::new(j - 1))
        } else {
            LinForm::Diff(Var::new(j - 1), Var::new(i - 1))
        };
        self.emit_directed(form, upper, lower, out);
    }

    fn emit_pair_oct(&self, m: &SquareMatrix, i: usize, j: usize, out: &mut Vec<Constraint>) {
        debug_assert!(j > i);
        let oi = Occ::from_index(i);
        let oj = Occ::from_index(j);
        if oj == oi.bar() {
            // Unary cells: (pos, neg) holds 2x <= c.
            let upper = m.at(i, j).half();
            let lower = m.at(j, i).half();
            self.emit_directed(LinForm::Plus(oi.var()), &upper, &lower, out);
            return;
        }
        // val(i) - val(j) <= m[i][j]; express as a form on the variables.
        let form = match (oi.is_neg(), oj.is_neg()) {
            (false, false) => LinForm::Diff(oi.var(), oj.var()),
            (false, true) => LinForm::Sum(oi.var(), oj.var()),
            (true, false) => LinForm::NegSum(oi.var(), oj.var()),
            (true, true) => LinForm::Diff(oj.var(), oi.var()),
        };
        let upper = m.at(i, j);
        let lower = m.at(j, i);
        self.emit_directed(form, upper, lower, out);
    }

    /// `form <= upper` and `-form <= lower`; merged into an equality when
    /// the two agree exactly.
    fn emit_directed(&self, form: LinForm, upper: &Bound, lower: &Bound, out: &mut Vec<Constraint>) {
        match (upper.as_finite(), lower.as_finite()) {
            (Some(u), Some(l)) if *u == -l.clone() => {
                out.push(Constraint::new(form, Rel::Eq, u.clone()).unwrap());
            }
            (u, l) => {
                if let Some(u) = u {
                    out.push(Constraint::new(form, Rel::Le, u.clone()).unwrap());
                }
                if let Some(l) = l {
                    out.push(Constraint::new(form.negated(), Rel::Le, l.clone()).unwrap());
                }
            }
        }
    }

    /// Reads the bounding box of the shape (closing it first).
    pub fn to_box(&self) -> BoundBox {
        if self.is_empty() {
            return BoundBox::empty(self.dim);
        }
        let st = self.state.borrow();
        let m = &st.matrix;
        let mut b = BoundBox::universe(self.dim);
        for v in 0..self.dim {
            let var = Var::new(v);
            let (hi, lo) = match self.topology {
                Topology::BoundedDifference => {
                    (m.at(v + 1, 0).clone(), -m.at(0, v + 1))
                }
                Topology::Octagon => (
                    m.at(var.pos().index(), var.neg().index()).half(),
                    -m.at(var.neg().index(), var.pos().index()).half(),
                ),
            };
            b.set_interval(var, Interval::closed(lo, hi));
        }
        b
    }
}

// ─── Closure, reduction, and queries ───

impl Shape {
    /// Ensures the matrix is closed (all implied bounds explicit) or the
    /// shape is marked empty. Lazy: a no-op when the status is current.
    pub fn close(&self) {
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() || st.status.is_closed() {
            return;
        }
        if let Some(stats) = &self.stats {
            stats.note_closure();
        }
        let nodes = self.nodes();
        if nodes == 0 {
            st.status.set_closed();
            return;
        }
        let m = Rc::make_mut(&mut st.matrix);
        let consistent = match self.topology {
            Topology::BoundedDifference => closure::shortest_path_closure(m),
            Topology::Octagon => closure::strong_closure(m, self.coeff == CoeffKind::Integer),
        };
        if consistent {
            st.status.set_closed();
        } else {
            debug!("close: inconsistent system, installing the empty shape");
            st.status.set_empty();
            st.matrix = Rc::new(SquareMatrix::universe(nodes));
            st.reduced = None;
        }
    }

    /// Ensures the canonical minimal representation is available.
    pub fn reduce(&self) {
        self.close();
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() || st.status.is_reduced() {
            return;
        }
        if let Some(stats) = &self.stats {
            stats.note_reduction();
        }
        let reduced = closure::reduce(&st.matrix, self.is_octagon());
        st.reduced = Some(Rc::new(reduced));
        st.status.set_reduced();
    }

    /// True if the shape contains no points.
    pub fn is_empty(&self) -> bool {
        self.close();
        self.state.borrow().status.is_empty()
    }

    /// True if the shape is the whole space.
    pub fn is_universe(&self) -> bool {
        {
            let st = self.state.borrow();
            if st.status.is_empty() {
                return false;
            }
            if st.status.is_universe() {
                return true;
            }
        }
        if self.is_empty() {
            return false;
        }
        let st = self.state.borrow();
        let n = st.matrix.n();
        for i in 0..n {
            for j in 0..n {
                if i != j && st.matrix.at(i, j).is_finite() {
                    return false;
                }
            }
        }
        true
    }

    /// True if every point of `other` lies in `self`.
    pub fn contains(&self, other: &Shape) -> Result<bool, Error> {
        self.check_compat(other, "contains")?;
        if other.is_empty() {
            return Ok(true);
        }
        if self.is_empty() {
            return Ok(false);
        }
        let a = self.state.borrow();
        let b = other.state.borrow();
        let n = a.matrix.n();
        for i in 0..n {
            for j in 0..n {
                if b.matrix.at(i, j) > a.matrix.at(i, j) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Intersection, in place. Exact: the result is the set intersection.
    pub fn intersection_assign(&mut self, other: &Shape) -> Result<(), Error> {
        self.check_compat(other, "intersection")?;
        {
            let st = self.state.borrow();
            if st.status.is_empty() {
                return Ok(());
            }
        }
        if other.state.borrow().status.is_empty() {
            self.install_empty();
            return Ok(());
        }
        let other_state = other.state.borrow();
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let n = m.n();
        let mut changed = false;
        for i in 0..n {
            for j in 0..n {
                changed |= m.tighten(i, j, other_state.matrix.at(i, j));
            }
        }
        if changed {
            st.clear_derived();
        }
        Ok(())
    }

    /// Smallest shape containing both operands (the convex-union
    /// over-approximation), in place.
    pub fn upper_bound_assign(&mut self, other: &Shape) -> Result<(), Error> {
        self.check_compat(other, "upper bound")?;
        self.close();
        other.close();
        if other.state.borrow().status.is_empty() {
            return Ok(());
        }
        if self.state.borrow().status.is_empty() {
            *self.state.borrow_mut() = other.state.borrow().clone();
            return Ok(());
        }
        let other_state = other.state.borrow();
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let n = m.n();
        for i in 0..n {
            for j in 0..n {
                m.relax(i, j, other_state.matrix.at(i, j));
            }
        }
        // The entrywise max of two closed matrices is closed.
        st.status.clear_derived();
        st.reduced = None;
        st.status.set_closed();
        Ok(())
    }

    pub(crate) fn install_empty(&mut self) {
        let nodes = self.nodes();
        let mut st = self.state.borrow_mut();
        st.status.set_empty();
        st.matrix = Rc::new(SquareMatrix::universe(nodes));
        st.reduced = None;
    }
}

impl PartialEq for Shape {
    /// Semantic equality: same topology, coefficients and dimension, and
    /// the same set of points (compared on canonical closed forms).
    fn eq(&self, other: &Shape) -> bool {
        if self.topology != other.topology || self.coeff != other.coeff || self.dim != other.dim
        {
            return false;
        }
        self.close();
        other.close();
        let a = self.state.borrow();
        let b = other.state.borrow();
        match (a.status.is_empty(), b.status.is_empty()) {
            (true, true) => true,
            (false, false) => a.matrix == b.matrix,
            _ => false,
        }
    }
}

impl Eq for Shape {}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        if st.status.is_empty() {
            return write!(f, "false");
        }
        drop(st);
        let cs = self.constraints();
        if cs.is_empty() {
            return write!(f, "true");
        }
        let parts: Vec<String> = cs.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

// ─── Dimension surgery ───

impl Shape {
    /// Node index map for renumbering variables: `var_map[v]` is the new id
    /// of variable `v`, `None` meaning removed.
    fn node_map(&self, var_map: &[Option<usize>]) -> Vec<Option<usize>> {
        match self.topology {
            Topology::BoundedDifference => {
                let mut map = vec![None; self.dim + 1];
                map[0] = Some(0);
                for (v, &target) in var_map.iter().enumerate() {
                    map[v + 1] = target.map(|t| t + 1);
                }
                map
            }
            Topology::Octagon => {
                let mut map = vec![None; 2 * self.dim];
                for (v, &target) in var_map.iter().enumerate() {
                    if let Some(t) = target {
                        map[2 * v] = Some(2 * t);
                        map[2 * v + 1] = Some(2 * t + 1);
                    }
                }
                map
            }
        }
    }

    /// Appends `k` unconstrained dimensions. Closure and reduction survive:
    /// embedding adds no bound and removes none.
    pub fn add_dims_embed(&mut self, k: usize) -> Result<(), Error> {
        let new_dim = self.dim + k;
        Self::check_dim(new_dim)?;
        if k == 0 {
            return Ok(());
        }
        let grow_nodes = Self::node_count(self.topology, new_dim) - self.nodes();
        let mut st = self.state.borrow_mut();
        Rc::make_mut(&mut st.matrix).grow(grow_nodes);
        if let Some(reduced) = &mut st.reduced {
            Rc::make_mut(reduced).grow(grow_nodes);
        }
        drop(st);
        self.dim = new_dim;
        Ok(())
    }

    /// Appends `k` dimensions each constrained to 0. When the shape is
    /// closed the new rows and columns are written directly (the implied
    /// relations to the old variables), so closure is preserved without a
    /// recomputation.
    pub fn add_dims_project(&mut self, k: usize) -> Result<(), Error> {
        let old_dim = self.dim;
        self.add_dims_embed(k)?;
        if k == 0 {
            return Ok(());
        }
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() {
            return Ok(());
        }
        let was_closed = st.status.is_closed();
        let m = Rc::make_mut(&mut st.matrix);
        let zero = Bound::zero();
        match self.topology {
            Topology::BoundedDifference => {
                for v in old_dim..self.dim {
                    m.set(v + 1, 0, zero.clone());
                    m.set(0, v + 1, zero.clone());
                }
                if was_closed {
                    for v in old_dim..self.dim {
                        for i in 1..m.n() {
                            if i == v + 1 {
                                continue;
                            }
                            let to_anchor = m.at(i, 0).clone();
                            let from_anchor = m.at(0, i).clone();
                            m.set(i, v + 1, to_anchor);
                            m.set(v + 1, i, from_anchor);
                        }
                    }
                }
            }
            Topology::Octagon => {
                for v in old_dim..self.dim {
                    m.set(2 * v, 2 * v + 1, zero.clone());
                    m.set(2 * v + 1, 2 * v, zero.clone());
                }
                if was_closed {
                    for v in old_dim..self.dim {
                        for i in 0..m.n() {
                            if i == 2 * v || i == 2 * v + 1 {
                                continue;
                            }
                            let bar = i ^ 1;
                            let upper = m.at(i, bar).half();
                            let lower = m.at(bar, i).half();
                            m.set(i, 2 * v, upper.clone());
                            m.set(i, 2 * v + 1, upper);
                            m.set(2 * v, i, lower.clone());
                            m.set(2 * v + 1, i, lower);
                        }
                    }
                }
            }
        }
        // The zero dimensions are constrained, so this is no longer the
        // universe; closure survives only thanks to the direct update.
        st.clear_derived();
        if was_closed {
            st.status.set_closed();
        }
        Ok(())
    }

    /// Removes the given dimensions and renumbers the rest contiguously in
    /// increasing order. Fails without modification if any named dimension
    /// is outside the space.
    pub fn remove_dims(&mut self, set: &VarSet) -> Result<(), Error> {
        if let Some(max) = set.max() {
            if max.id() >= self.dim {
                return Err(Error::Dimension(format!(
                    "{} is outside the {}-dimensional space",
                    max, self.dim
                )));
            }
        }
        if set.is_empty() {
            return Ok(());
        }
        // Projection must see the implied constraints between the survivors.
        self.close();
        let new_dim = self.dim - set.len();
        let new_nodes = Self::node_count(self.topology, new_dim);
        let mut var_map = Vec::with_capacity(self.dim);
        let mut next = 0;
        for v in 0..self.dim {
            if set.contains(Var::new(v)) {
                var_map.push(None);
            } else {
                var_map.push(Some(next));
                next += 1;
            }
        }
        let node_map = self.node_map(&var_map);
        {
            let mut st = self.state.borrow_mut();
            if st.status.is_empty() {
                st.matrix = Rc::new(SquareMatrix::universe(new_nodes));
            } else {
                Rc::make_mut(&mut st.matrix).remap(&node_map, new_nodes);
                // A principal submatrix of a closed matrix is closed.
                st.reduced = None;
                st.status.clear_reduced();
            }
        }
        self.dim = new_dim;
        Ok(())
    }

    /// Truncates to the first `new_dim` dimensions; equivalent to removing
    /// the complement but cheaper (a block copy, no renumbering).
    pub fn remove_higher_dims(&mut self, new_dim: usize) -> Result<(), Error> {
        if new_dim > self.dim {
            return Err(Error::Dimension(format!(
                "cannot truncate a {}-dimensional space to {}",
                self.dim, new_dim
            )));
        }
        if new_dim == self.dim {
            return Ok(());
        }
        self.close();
        let new_nodes = Self::node_count(self.topology, new_dim);
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() {
            st.matrix = Rc::new(SquareMatrix::universe(new_nodes));
        } else {
            let nodes = st.matrix.n();
            let map: Vec<Option<usize>> = (0..nodes)
                .map(|i| if i < new_nodes { Some(i) } else { None })
                .collect();
            Rc::make_mut(&mut st.matrix).remap(&map, new_nodes);
            st.reduced = None;
            st.status.clear_reduced();
        }
        drop(st);
        self.dim = new_dim;
        Ok(())
    }

    /// Folds the dimensions of `set` into `into`: `into` gets the convex
    /// union of everyone's bound information, then `set` is removed. This
    /// deliberately over-approximates. A no-op when `set` is empty.
    pub fn fold_dims(&mut self, set: &VarSet, into: Var) -> Result<(), Error> {
        if into.id() >= self.dim {
            return Err(Error::Dimension(format!(
                "{} is outside the {}-dimensional space",
                into, self.dim
            )));
        }
        if let Some(max) = set.max() {
            if max.id() >= self.dim {
                return Err(Error::Dimension(format!(
                    "{} is outside the {}-dimensional space",
                    max, self.dim
                )));
            }
        }
        if set.contains(into) {
            return Err(Error::Dimension(format!(
                "cannot fold {} into itself",
                into
            )));
        }
        if set.is_empty() {
            return Ok(());
        }
        self.close();
        if !self.state.borrow().status.is_empty() {
            let mut st = self.state.borrow_mut();
            let m = Rc::make_mut(&mut st.matrix);
            for s in set.iter() {
                match self.topology {
                    Topology::BoundedDifference => {
                        let nw = into.id() + 1;
                        let ns = s.id() + 1;
                        for i in 0..m.n() {
                            if i == nw || i == ns {
                                continue;
                            }
                            let row = m.at(ns, i).clone();
                            m.relax(nw, i, &row);
                            let col = m.at(i, ns).clone();
                            m.relax(i, nw, &col);
                        }
                    }
                    Topology::Octagon => {
                        let pw = into.pos().index();
                        let nw = into.neg().index();
                        let ps = s.pos().index();
                        let ns = s.neg().index();
                        for i in 0..m.n() {
                            if i == pw || i == nw || i == ps || i == ns {
                                continue;
                            }
                            for (w_occ, s_occ) in [(pw, ps), (nw, ns)] {
                                let row = m.at(s_occ, i).clone();
                                m.relax(w_occ, i, &row);
                                let col = m.at(i, s_occ).clone();
                                m.relax(i, w_occ, &col);
                            }
                        }
                        let unary = m.at(ps, ns).clone();
                        m.relax(pw, nw, &unary);
                        let unary = m.at(ns, ps).clone();
                        m.relax(nw, pw, &unary);
                    }
                }
            }
            st.clear_derived();
        }
        self.remove_dims(set)
    }

    /// Appends `k` fresh dimensions, each an exact copy of the constraints
    /// on `v` (every bound mentioning `v` is duplicated; the copies are
    /// mutually unconstrained). Approximately reverses a previous fold.
    pub fn expand_dim(&mut self, v: Var, k: usize) -> Result<(), Error> {
        if v.id() >= self.dim {
            return Err(Error::Dimension(format!(
                "{} is outside the {}-dimensional space",
                v, self.dim
            )));
        }
        let old_dim = self.dim;
        let old_nodes = self.nodes();
        self.add_dims_embed(k)?;
        if k == 0 {
            return Ok(());
        }
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() {
            return Ok(());
        }
        let m = Rc::make_mut(&mut st.matrix);
        for u in old_dim..self.dim {
            match self.topology {
                Topology::BoundedDifference => {
                    let nu = u + 1;
                    let nv = v.id() + 1;
                    for i in 0..old_nodes {
                        if i == nv {
                            continue;
                        }
                        let row = m.at(nv, i).clone();
                        m.set(nu, i, row);
                        let col = m.at(i, nv).clone();
                        m.set(i, nu, col);
                    }
                }
                Topology::Octagon => {
                    let pu = 2 * u;
                    let nu = 2 * u + 1;
                    let pv = v.pos().index();
                    let nv = v.neg().index();
                    for i in 0..old_nodes {
                        if i == pv || i == nv {
                            continue;
                        }
                        for (u_occ, v_occ) in [(pu, pv), (nu, nv)] {
                            let row = m.at(v_occ, i).clone();
                            m.set(u_occ, i, row);
                            let col = m.at(i, v_occ).clone();
                            m.set(i, u_occ, col);
                        }
                    }
                    let unary = m.at(pv, nv).clone();
                    m.set(pu, nu, unary);
                    let unary = m.at(nv, pv).clone();
                    m.set(nu, pu, unary);
                }
            }
        }
        // The copies' relations among themselves and to the original are
        // implied but not written, so the matrix is no longer closed.
        st.clear_derived();
        Ok(())
    }

    /// Appends the dimensions of `other` after this shape's own: the
    /// positional disjoint union, with no cross-constraints. An empty
    /// operand makes the result empty.
    pub fn concatenate_assign(&mut self, other: &Shape) -> Result<(), Error> {
        if self.topology != other.topology || self.coeff != other.coeff {
            return Err(Error::Dimension(format!(
                "concatenate: incompatible shape kinds ({:?}/{:?} vs {:?}/{:?})",
                self.topology, self.coeff, other.topology, other.coeff
            )));
        }
        let new_dim = self.dim + other.dim;
        Self::check_dim(new_dim)?;
        if self.is_empty() || other.is_empty() {
            self.dim = new_dim;
            self.install_empty();
            return Ok(());
        }
        let offset = self.dim;
        self.add_dims_embed(other.dim)?;
        let other_state = other.state.borrow();
        let om = &other_state.matrix;
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        match self.topology {
            Topology::BoundedDifference => {
                // The anchor node is shared between the blocks.
                let map = |i: usize| if i == 0 { 0 } else { offset + i };
                for i in 0..om.n() {
                    for j in 0..om.n() {
                        if i != j {
                            m.set(map(i), map(j), om.at(i, j).clone());
                        }
                    }
                }
            }
            Topology::Octagon => {
                for i in 0..om.n() {
                    for j in 0..om.n() {
                        if i != j {
                            m.set(2 * offset + i, 2 * offset + j, om.at(i, j).clone());
                        }
                    }
                }
            }
        }
        // Even with both operands closed the result is not: the blocks'
        // unary bounds imply cross relations that are not written.
        st.clear_derived();
        Ok(())
    }

    /// Renames dimensions along an injective partial map: `map[v]` is the
    /// new id of variable `v`, `None` projects it away. The targets must be
    /// exactly `0..new_dim` where `new_dim` is the number of survivors.
    pub fn map_dims(&mut self, map: &[Option<usize>]) -> Result<(), Error> {
        if map.len() != self.dim {
            return Err(Error::Dimension(format!(
                "map covers {} dimensions, the shape has {}",
                map.len(),
                self.dim
            )));
        }
        let new_dim = map.iter().filter(|t| t.is_some()).count();
        let mut seen = vec![false; new_dim];
        for &target in map {
            if let Some(t) = target {
                if t >= new_dim {
                    return Err(Error::Dimension(format!(
                        "map target {} is outside the {}-dimensional result",
                        t, new_dim
                    )));
                }
                if seen[t] {
                    return Err(Error::Dimension(format!("map target {} repeated", t)));
                }
                seen[t] = true;
            }
        }
        let projecting = new_dim != self.dim;
        if projecting {
            // Dropping dimensions must see the implied constraints.
            self.close();
        }
        let new_nodes = Self::node_count(self.topology, new_dim);
        let node_map = self.node_map(map);
        let mut st = self.state.borrow_mut();
        if st.status.is_empty() {
            st.matrix = Rc::new(SquareMatrix::universe(new_nodes));
        } else {
            Rc::make_mut(&mut st.matrix).remap(&node_map, new_nodes);
            st.reduced = None;
            st.status.clear_reduced();
        }
        drop(st);
        self.dim = new_dim;
        Ok(())
    }
}

// ─── Affine images ───

impl Shape {
    fn check_affine(&self, v: Var, form: &AffineForm) -> Result<(Bound, Bound), Error> {
        if v.id() >= self.dim {
            return Err(Error::Dimension(format!(
                "{} is outside the {}-dimensional space",
                v, self.dim
            )));
        }
        if let Some((_, w)) = form.var {
            if w.id() >= self.dim {
                return Err(Error::Dimension(format!(
                    "{} is outside the {}-dimensional space",
                    w, self.dim
                )));
            }
        }
        let mut lo = form.lo.clone();
        let mut hi = form.hi.clone();
        if self.coeff == CoeffKind::Integer {
            lo = lo.ceil();
            hi = hi.floor();
        }
        Ok((lo, hi))
    }

    /// Assigns `v := form`, replacing the shape by the exact image where the
    /// form allows it (shifts, reflections, single-variable transfers) and
    /// a sound interval approximation otherwise (the bounded-difference
    /// topology cannot express a reflected relation).
    pub fn affine_image(&mut self, v: Var, form: &AffineForm) -> Result<(), Error> {
        let (lo, hi) = self.check_affine(v, form)?;
        if self.is_empty() {
            return Ok(());
        }
        if lo > hi || lo.is_pos_inf() || hi.is_neg_inf() {
            // The right-hand side has no possible (finite) value.
            self.install_empty();
            return Ok(());
        }
        match form.var {
            Some((Sign::Pos, w)) if w == v => self.shift_var(v, &lo, &hi),
            Some((Sign::Neg, w)) if w == v => {
                if self.is_octagon() {
                    self.reflect_var(v);
                    self.shift_var(v, &lo, &hi);
                } else {
                    // x := -x + [lo, hi] via the interval of -x.
                    self.close();
                    if self.state.borrow().status.is_empty() {
                        return Ok(());
                    }
                    let (cur_lo, cur_hi) = self.var_bounds(v);
                    let new_lo = lo.add(&-cur_hi);
                    let new_hi = hi.add(&-cur_lo);
                    self.forget_and_bound(v, &new_lo, &new_hi);
                }
            }
            Some((sign, w)) => {
                self.close();
                if self.state.borrow().status.is_empty() {
                    return Ok(());
                }
                if sign == Sign::Neg && !self.is_octagon() {
                    // No representable relation to -w; keep the interval.
                    let (w_lo, w_hi) = self.var_bounds(w);
                    let new_lo = lo.add(&-w_hi);
                    let new_hi = hi.add(&-w_lo);
                    self.forget_and_bound(v, &new_lo, &new_hi);
                } else {
                    self.transfer_var(v, sign, w, &lo, &hi);
                }
            }
            None => {
                self.close();
                if self.state.borrow().status.is_empty() {
                    return Ok(());
                }
                self.forget_and_bound(v, &lo, &hi);
            }
        }
        Ok(())
    }

    /// Assigns `v := form` backwards: the shape becomes the set of states
    /// from which the assignment can reach the current shape.
    pub fn affine_preimage(&mut self, v: Var, form: &AffineForm) -> Result<(), Error> {
        let (lo, hi) = self.check_affine(v, form)?;
        if self.is_empty() {
            return Ok(());
        }
        if lo > hi || lo.is_pos_inf() || hi.is_neg_inf() {
            // The assignment can produce nothing, so nothing maps into the
            // current shape.
            self.install_empty();
            return Ok(());
        }
        match form.var {
            // x := x + [lo, hi] reverses to x := x + [-hi, -lo].
            Some((Sign::Pos, w)) if w == v => self.shift_var(v, &-&hi, &-&lo),
            // x := -x + [lo, hi] is its own inverse.
            Some((Sign::Neg, w)) if w == v => {
                return self.affine_image(v, &AffineForm::var_offset(Sign::Neg, v, lo, hi));
            }
            Some((sign, w)) => {
                self.close();
                if self.state.borrow().status.is_empty() {
                    return Ok(());
                }
                if sign == Sign::Neg && !self.is_octagon() {
                    // Keep only what the unary bounds of v say about w:
                    // some u in [-w + lo, -w + hi] must satisfy them.
                    let (v_lo, v_hi) = self.var_bounds(v);
                    let mut st = self.state.borrow_mut();
                    let m = Rc::make_mut(&mut st.matrix);
                    let nw = w.id() + 1;
                    // w <= hi - lb(v)  and  -w <= ub(v) - lo
                    m.tighten(nw, 0, &hi.add(&-v_lo));
                    m.tighten(0, nw, &v_hi.add(&-lo));
                    drop(st);
                    self.forget_var(v);
                    self.state.borrow_mut().clear_derived();
                } else {
                    self.substitute_var(v, sign, w, &lo, &hi);
                }
            }
            None => {
                self.close();
                if self.state.borrow().status.is_empty() {
                    return Ok(());
                }
                // Some value in [lo, hi] must satisfy v's own unary bounds.
                let (v_lo, v_hi) = self.var_bounds(v);
                if lo > v_hi || v_lo > hi {
                    self.install_empty();
                    return Ok(());
                }
                // Constraints tying v to others transfer to the window ends.
                self.substitute_interval(v, &lo, &hi);
            }
        }
        Ok(())
    }

    /// Unary bounds of `v` from the (closed) matrix: `(lower, upper)`.
    fn var_bounds(&self, v: Var) -> (Bound, Bound) {
        let st = self.state.borrow();
        let m = &st.matrix;
        match self.topology {
            Topology::BoundedDifference => (-m.at(0, v.id() + 1), m.at(v.id() + 1, 0).clone()),
            Topology::Octagon => (
                -m.at(v.neg().index(), v.pos().index()).half(),
                m.at(v.pos().index(), v.neg().index()).half(),
            ),
        }
    }

    /// In-place shift `v := v + [lo, hi]`. Exact; needs no closure.
    fn shift_var(&mut self, v: Var, lo: &Bound, hi: &Bound) {
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let neg_lo = -lo;
        match self.topology {
            Topology::BoundedDifference => {
                let nv = v.id() + 1;
                for j in 0..m.n() {
                    if j != nv {
                        let row = m.at(nv, j).add(hi);
                        m.set(nv, j, row);
                        let col = m.at(j, nv).add(&neg_lo);
                        m.set(j, nv, col);
                    }
                }
            }
            Topology::Octagon => {
                let pv = v.pos().index();
                let nv = v.neg().index();
                // The unary mirror cells sit on one shifted row and one
                // shifted column each, so they collect both increments.
                for j in 0..m.n() {
                    if j != pv {
                        let row = m.at(pv, j).add(hi);
                        m.set(pv, j, row);
                        let col = m.at(j, pv).add(&neg_lo);
                        m.set(j, pv, col);
                    }
                }
                for j in 0..m.n() {
                    if j != nv {
                        let row = m.at(nv, j).add(&neg_lo);
                        m.set(nv, j, row);
                        let col = m.at(j, nv).add(hi);
                        m.set(j, nv, col);
                    }
                }
            }
        }
        if lo == hi && lo.is_finite() {
            // An exact translation slides every bound uniformly; closure
            // survives, minimality does not (the cache is stale).
            st.reduced = None;
            st.status.clear_reduced();
        } else {
            st.clear_derived();
        }
    }

    /// In-place reflection `v := -v` on an octagon: swap the two
    /// occurrences of `v`. Exact and closure-preserving.
    fn reflect_var(&mut self, v: Var) {
        debug_assert!(self.is_octagon());
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let pv = v.pos().index();
        let nv = v.neg().index();
        let n = m.n();
        let map: Vec<Option<usize>> = (0..n)
            .map(|i| {
                Some(if i == pv {
                    nv
                } else if i == nv {
                    pv
                } else {
                    i
                })
            })
            .collect();
        m.remap(&map, n);
        st.reduced = None;
        st.status.clear_reduced();
    }

    /// Clears every constraint mentioning `v`. The caller has closed the
    /// shape, so the information relayed through `v` survives elsewhere.
    fn forget_var(&mut self, v: Var) {
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        match self.topology {
            Topology::BoundedDifference => m.clear_node(v.id() + 1),
            Topology::Octagon => {
                m.clear_node(v.pos().index());
                m.clear_node(v.neg().index());
            }
        }
    }

    /// `v := [lo, hi]` on a closed shape: forget, then write the unary
    /// bounds.
    fn forget_and_bound(&mut self, v: Var, lo: &Bound, hi: &Bound) {
        self.forget_var(v);
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        match self.topology {
            Topology::BoundedDifference => {
                let nv = v.id() + 1;
                if hi.is_finite() {
                    m.set(nv, 0, hi.clone());
                }
                if lo.is_finite() {
                    m.set(0, nv, -lo);
                }
            }
            Topology::Octagon => {
                let pv = v.pos().index();
                let nv = v.neg().index();
                if hi.is_finite() {
                    m.set(pv, nv, hi.double());
                }
                if lo.is_finite() {
                    m.set(nv, pv, (-lo).double());
                }
            }
        }
        st.clear_derived();
    }

    /// `v := ±w + [lo, hi]` with `w != v` on a closed shape: forget `v`,
    /// then write the exact relational bounds to `w`.
    fn transfer_var(&mut self, v: Var, sign: Sign, w: Var, lo: &Bound, hi: &Bound) {
        debug_assert!(v != w);
        self.forget_var(v);
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let neg_lo = -lo;
        match self.topology {
            Topology::BoundedDifference => {
                debug_assert_eq!(sign, Sign::Pos);
                let nv = v.id() + 1;
                let nw = w.id() + 1;
                if hi.is_finite() {
                    m.set(nv, nw, hi.clone());
                }
                if neg_lo.is_finite() {
                    m.set(nw, nv, neg_lo);
                }
            }
            Topology::Octagon => {
                let pv = v.pos().index();
                let nv = v.neg().index();
                // Occurrence standing for +(±w).
                let wp = match sign {
                    Sign::Pos => w.pos().index(),
                    Sign::Neg => w.neg().index(),
                };
                if hi.is_finite() {
                    // v - (±w) <= hi, coherently.
                    m.set(pv, wp, hi.clone());
                    m.set(wp ^ 1, nv, hi.clone());
                }
                if neg_lo.is_finite() {
                    // (±w) - v <= -lo, coherently.
                    m.set(wp, pv, neg_lo.clone());
                    m.set(nv, wp ^ 1, neg_lo.clone());
                }
            }
        }
        st.clear_derived();
    }

    /// Preimage of `v := ±w + [lo, hi]` with `w != v` on a closed shape:
    /// every constraint on `v` is rewritten onto `w` at the matching end of
    /// the window, then `v` is forgotten. Closure makes the per-constraint
    /// rewriting exact.
    fn substitute_var(&mut self, v: Var, sign: Sign, w: Var, lo: &Bound, hi: &Bound) {
        debug_assert!(v != w);
        let neg_lo = -lo;
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        match self.topology {
            Topology::BoundedDifference => {
                debug_assert_eq!(sign, Sign::Pos);
                let nv = v.id() + 1;
                let nw = w.id() + 1;
                for j in 0..m.n() {
                    if j == nv {
                        continue;
                    }
                    // v - y <= c becomes w - y <= c - lo (inconsistencies
                    // land on the diagonal for closure to find).
                    let row = m.at(nv, j).clone();
                    if row.is_finite() {
                        let value = row.add(&neg_lo);
                        m.tighten(nw, j, &value);
                    }
                    // y - v <= c becomes y - w <= c + hi.
                    let col = m.at(j, nv).clone();
                    if col.is_finite() {
                        let value = col.add(hi);
                        m.tighten(j, nw, &value);
                    }
                }
            }
            Topology::Octagon => {
                let pv = v.pos().index();
                let nv = v.neg().index();
                let (wp, wn) = match sign {
                    Sign::Pos => (w.pos().index(), w.neg().index()),
                    Sign::Neg => (w.neg().index(), w.pos().index()),
                };
                for j in 0..m.n() {
                    if j != pv && j != nv {
                        let row = m.at(pv, j).clone();
                        if row.is_finite() {
                            let value = row.add(&neg_lo);
                            m.tighten(wp, j, &value);
                        }
                        let col = m.at(j, pv).clone();
                        if col.is_finite() {
                            let value = col.add(hi);
                            m.tighten(j, wp, &value);
                        }
                        let row = m.at(nv, j).clone();
                        if row.is_finite() {
                            let value = row.add(hi);
                            m.tighten(wn, j, &value);
                        }
                        let col = m.at(j, nv).clone();
                        if col.is_finite() {
                            let value = col.add(&neg_lo);
                            m.tighten(j, wn, &value);
                        }
                    }
                }
                // v's own unary window: 2v <= c needs 2(±w) <= c - 2lo,
                // and -2v <= c needs -2(±w) <= c + 2hi.
                let unary = m.at(pv, nv).clone();
                if unary.is_finite() {
                    let value = unary.add(&neg_lo).add(&neg_lo);
                    m.tighten(wp, wp ^ 1, &value);
                }
                let unary = m.at(nv, pv).clone();
                if unary.is_finite() {
                    let value = unary.add(hi).add(hi);
                    m.tighten(wn, wn ^ 1, &value);
                }
            }
        }
        drop(st);
        self.forget_var(v);
        self.state.borrow_mut().clear_derived();
    }

    /// Preimage of `v := [lo, hi]` on a closed shape: constraints tying `v`
    /// to other variables become unary bounds at the window ends, then `v`
    /// is forgotten.
    fn substitute_interval(&mut self, v: Var, lo: &Bound, hi: &Bound) {
        let neg_lo = -lo;
        let mut st = self.state.borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        match self.topology {
            Topology::BoundedDifference => {
                let nv = v.id() + 1;
                for j in 1..m.n() {
                    if j == nv {
                        continue;
                    }
                    // v - y <= c becomes -y <= c - lo.
                    let row = m.at(nv, j).clone();
                    if row.is_finite() {
                        let value = row.add(&neg_lo);
                        m.tighten(0, j, &value);
                    }
                    // y - v <= c becomes y <= c + hi.
                    let col = m.at(j, nv).clone();
                    if col.is_finite() {
                        let value = col.add(hi);
                        m.tighten(j, 0, &value);
                    }
                }
            }
            Topology::Octagon => {
                let pv = v.pos().index();
                let nv = v.neg().index();
                for j in 0..m.n() {
                    if j == pv || j == nv {
                        continue;
                    }
                    let jbar = j ^ 1;
                    // v - val(j) <= c becomes -val(j) <= c - lo.
                    let row = m.at(pv, j).clone();
                    if row.is_finite() {
                        let value = row.add(&neg_lo).double();
                        m.tighten(jbar, j, &value);
                    }
                    // val(j) - v <= c becomes val(j) <= c + hi.
                    let col = m.at(j, pv).clone();
                    if col.is_finite() {
                        let value = col.add(hi).double();
                        m.tighten(j, jbar, &value);
                    }
                }
            }
        }
        drop(st);
        self.forget_var(v);
        self.state.borrow_mut().clear_derived();
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn x() -> Var {
        Var::new(0)
    }
    fn y() -> Var {
        Var::new(1)
    }

    fn le(form: LinForm, c: i64) -> Constraint {
        Constraint::new_int(form, Rel::Le, c).unwrap()
    }
    fn ge(form: LinForm, c: i64) -> Constraint {
        Constraint::new_int(form, Rel::Ge, c).unwrap()
    }
    fn eq(form: LinForm, c: i64) -> Constraint {
        Constraint::new_int(form, Rel::Eq, c).unwrap()
    }

    fn bd(dim: usize, constraints: &[Constraint]) -> Shape {
        Shape::from_constraints(
            Topology::BoundedDifference,
            CoeffKind::Rational,
            dim,
            constraints,
        )
        .unwrap()
    }

    fn oct(dim: usize, constraints: &[Constraint]) -> Shape {
        Shape::from_constraints(Topology::Octagon, CoeffKind::Rational, dim, constraints)
            .unwrap()
    }

    #[test]
    fn test_universe_and_empty() {
        for topology in [Topology::BoundedDifference, Topology::Octagon] {
            let u = Shape::universe(topology, CoeffKind::Rational, 3).unwrap();
            assert!(u.is_universe());
            assert!(!u.is_empty());
            assert!(u.constraints().is_empty());

            let e = Shape::empty(topology, CoeffKind::Rational, 3).unwrap();
            assert!(e.is_empty());
            assert!(!e.is_universe());
            assert!(u.contains(&e).unwrap());
            assert!(!e.contains(&u).unwrap());
        }
    }

    #[test]
    fn test_zero_dim_has_two_states() {
        let u = Shape::universe(Topology::Octagon, CoeffKind::Rational, 0).unwrap();
        let e = Shape::empty(Topology::Octagon, CoeffKind::Rational, 0).unwrap();
        assert!(u.is_universe());
        assert!(e.is_empty());
        assert_ne!(u, e);
        assert!(u.contains(&e).unwrap());
    }

    #[test]
    fn test_max_dimension_checked() {
        assert!(matches!(
            Shape::universe(Topology::Octagon, CoeffKind::Rational, MAX_SPACE_DIM + 1),
            Err(Error::MaxDimension { .. })
        ));
        let mut u = Shape::universe(Topology::Octagon, CoeffKind::Rational, 1).unwrap();
        assert!(matches!(
            u.add_dims_embed(MAX_SPACE_DIM),
            Err(Error::MaxDimension { .. })
        ));
        assert_eq!(u.space_dim(), 1);
    }

    #[test]
    fn test_add_constraint_rejects_out_of_space() {
        let mut shape = bd(2, &[]);
        let err = shape
            .add_constraint(&le(LinForm::Plus(Var::new(5)), 0))
            .unwrap_err();
        assert!(matches!(err, Error::Dimension(_)));
        // Atomicity: an equality whose second atom is bad changes nothing.
        assert!(shape.is_universe());
    }

    #[test]
    fn test_bd_rejects_sum_constraints() {
        let mut shape = bd(2, &[]);
        let err = shape
            .add_constraint(&le(LinForm::Sum(x(), y()), 1))
            .unwrap_err();
        assert!(matches!(err, Error::Representation(_)));
        assert!(shape.is_universe());

        let mut shape = oct(2, &[]);
        shape
            .add_constraint(&le(LinForm::Sum(x(), y()), 1))
            .unwrap();
        assert!(!shape.is_universe());
    }

    #[test]
    fn test_closure_detects_emptiness() {
        let shape = bd(2, &[le(LinForm::Plus(x()), 0), ge(LinForm::Plus(x()), 1)]);
        assert!(shape.is_empty());
        // The canonical empty form absorbs further constraints.
        let mut shape = shape;
        shape.add_constraint(&le(LinForm::Plus(y()), 5)).unwrap();
        assert!(shape.is_empty());
    }

    #[test]
    fn test_closure_idempotent() {
        let shape = oct(
            3,
            &[
                le(LinForm::Plus(x()), 4),
                le(LinForm::Diff(x(), y()), 1),
                le(LinForm::Sum(y(), Var::new(2)), 3),
            ],
        );
        shape.close();
        let once = shape.dump();
        // Re-run the engine from scratch on the already-closed matrix.
        let reclosed = Shape::from_raw_parts(
            shape.topology(),
            shape.coeff_kind(),
            shape.space_dim(),
            Status::unclosed(),
            shape.state().borrow().matrix.as_ref().clone(),
        );
        reclosed.close();
        assert_eq!(reclosed.dump(), once);
    }

    #[test]
    fn test_closure_derives_bounds() {
        // x - y <= 1 and y <= 2 imply x <= 3.
        let shape = bd(2, &[le(LinForm::Diff(x(), y()), 1), le(LinForm::Plus(y()), 2)]);
        let b = shape.to_box();
        assert_eq!(*b.interval(x()).hi(), Bound::int(3));

        let shape = oct(2, &[le(LinForm::Sum(x(), y()), 1), le(LinForm::Diff(x(), y()), 1)]);
        // Adding the two: 2x <= 2.
        let b = shape.to_box();
        assert_eq!(*b.interval(x()).hi(), Bound::int(1));
    }

    #[test]
    fn test_integer_octagon_tightens() {
        let shape = Shape::from_constraints(
            Topology::Octagon,
            CoeffKind::Integer,
            2,
            &[le(LinForm::Sum(x(), y()), 1), le(LinForm::Diff(x(), y()), 0)],
        )
        .unwrap();
        // 2x <= 1, and an integer x obeys x <= 0.
        let b = shape.to_box();
        assert_eq!(*b.interval(x()).hi(), Bound::int(0));
    }

    #[test]
    fn test_integer_octagon_detects_integral_emptiness() {
        // x == 1/2 has a rational point but no integer point.
        let make = |coeff| {
            Shape::from_constraints(
                Topology::Octagon,
                coeff,
                1,
                &[
                    Constraint::new(
                        LinForm::Plus(x()),
                        Rel::Eq,
                        BigRational::new(1.into(), 2.into()),
                    )
                    .unwrap(),
                ],
            )
            .unwrap()
        };
        assert!(!make(CoeffKind::Rational).is_empty());
        assert!(make(CoeffKind::Integer).is_empty());
    }

    #[test]
    fn test_equality_is_canonical() {
        // The same set, presented with and without a redundant constraint.
        let a = bd(
            2,
            &[
                le(LinForm::Diff(x(), y()), 1),
                le(LinForm::Plus(y()), 2),
                le(LinForm::Plus(x()), 3),
            ],
        );
        let b = bd(2, &[le(LinForm::Diff(x(), y()), 1), le(LinForm::Plus(y()), 2)]);
        assert_eq!(a, b);
        assert_eq!(a.minimized_constraints(), b.minimized_constraints());

        let c = bd(2, &[le(LinForm::Diff(x(), y()), 1)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_minimized_constraints_drop_redundancy() {
        let shape = bd(
            2,
            &[
                le(LinForm::Diff(x(), y()), 1),
                le(LinForm::Plus(y()), 2),
                le(LinForm::Plus(x()), 3),
            ],
        );
        let min = shape.minimized_constraints();
        assert_eq!(min.len(), 2);
        assert!(min.iter().all(|c| *c != le(LinForm::Plus(x()), 3)));
        // Reduction is flag-gated: a second call reuses the cache.
        assert_eq!(shape.minimized_constraints(), min);
    }

    #[test]
    fn test_equalities_read_back_merged() {
        let shape = oct(2, &[eq(LinForm::Diff(x(), y()), 2), eq(LinForm::Plus(x()), 1)]);
        let cs = shape.constraints();
        assert!(cs.contains(&eq(LinForm::Diff(x(), y()), 2)));
        assert!(cs.contains(&eq(LinForm::Plus(x()), 1)));
    }

    #[test]
    fn test_intersection_scenarios() {
        // empty ∩ anything = empty; universe ∩ x = x.
        let some = bd(2, &[le(LinForm::Plus(x()), 1)]);
        let mut e = Shape::empty(Topology::BoundedDifference, CoeffKind::Rational, 2).unwrap();
        e.intersection_assign(&some).unwrap();
        assert!(e.is_empty());

        let mut u = Shape::universe(Topology::BoundedDifference, CoeffKind::Rational, 2).unwrap();
        u.intersection_assign(&some).unwrap();
        assert_eq!(u, some);

        let mut a = bd(2, &[le(LinForm::Plus(x()), 1)]);
        let b = bd(2, &[ge(LinForm::Plus(x()), 2)]);
        a.intersection_assign(&b).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn test_upper_bound_is_convex_union() {
        let a = bd(1, &[eq(LinForm::Plus(x()), 0)]);
        let b = bd(1, &[eq(LinForm::Plus(x()), 5)]);
        let mut join = a.clone();
        join.upper_bound_assign(&b).unwrap();
        assert!(join.contains(&a).unwrap());
        assert!(join.contains(&b).unwrap());
        let expected = bd(1, &[ge(LinForm::Plus(x()), 0), le(LinForm::Plus(x()), 5)]);
        assert_eq!(join, expected);

        // An empty operand is absorbed.
        let mut join = Shape::empty(Topology::BoundedDifference, CoeffKind::Rational, 1).unwrap();
        join.upper_bound_assign(&b).unwrap();
        assert_eq!(join, b);
    }

    #[test]
    fn test_copy_on_write_clones() {
        let mut a = bd(2, &[le(LinForm::Plus(x()), 1)]);
        let b = a.clone();
        a.add_constraint(&le(LinForm::Plus(y()), 2)).unwrap();
        // The clone is unaffected by mutation of the original.
        assert!(!b.is_universe());
        assert_eq!(b, bd(2, &[le(LinForm::Plus(x()), 1)]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_embed_then_remove_round_trip() {
        let original = oct(
            2,
            &[le(LinForm::Diff(x(), y()), 1), ge(LinForm::Plus(x()), 0)],
        );
        let mut shape = original.clone();
        shape.add_dims_embed(2).unwrap();
        assert_eq!(shape.space_dim(), 4);
        let added: VarSet = [2usize, 3].into_iter().collect();
        shape.remove_dims(&added).unwrap();
        assert_eq!(shape, original);
    }

    #[test]
    fn test_remove_dims_projects() {
        // x - y <= 1, y - z <= 2: removing y must keep x - z <= 3.
        let z = Var::new(2);
        let mut shape = bd(
            3,
            &[le(LinForm::Diff(x(), y()), 1), le(LinForm::Diff(y(), z), 2)],
        );
        let set: VarSet = [1usize].into_iter().collect();
        shape.remove_dims(&set).unwrap();
        assert_eq!(shape.space_dim(), 2);
        // z is renumbered to x1.
        let expected = bd(2, &[le(LinForm::Diff(x(), y()), 3)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_remove_dims_out_of_space_is_untouched() {
        let mut shape = bd(2, &[le(LinForm::Plus(x()), 1)]);
        let snapshot = shape.clone();
        let set: VarSet = [5usize].into_iter().collect();
        assert!(matches!(shape.remove_dims(&set), Err(Error::Dimension(_))));
        assert_eq!(shape, snapshot);
        assert_eq!(shape.space_dim(), 2);
    }

    #[test]
    fn test_remove_higher_dims_matches_remove_dims() {
        let z = Var::new(2);
        let build = || {
            oct(
                3,
                &[
                    le(LinForm::Diff(x(), z), 1),
                    le(LinForm::Plus(y()), 2),
                    le(LinForm::Sum(x(), y()), 5),
                ],
            )
        };
        let mut a = build();
        a.remove_higher_dims(1).unwrap();
        let mut b = build();
        let set: VarSet = [1usize, 2].into_iter().collect();
        b.remove_dims(&set).unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            build().remove_higher_dims(7),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn test_remove_all_dims_keeps_emptiness() {
        // Scenario: removing every dimension leaves the 0-dim universe or
        // the 0-dim empty shape, matching the original emptiness.
        let all: VarSet = [0usize, 1].into_iter().collect();

        let mut nonempty = bd(2, &[le(LinForm::Plus(x()), 1)]);
        nonempty.remove_dims(&all).unwrap();
        assert_eq!(nonempty.space_dim(), 0);
        assert!(nonempty.is_universe());

        let mut empty = bd(2, &[le(LinForm::Plus(x()), 0), ge(LinForm::Plus(x()), 1)]);
        empty.remove_dims(&all).unwrap();
        assert_eq!(empty.space_dim(), 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_fold_scenario() {
        // Folding {A} into B on { 1 <= A <= 3, 7 <= B <= 12 } gives the
        // 1-dimensional { 1 <= A <= 12 }.
        for topology in [Topology::BoundedDifference, Topology::Octagon] {
            let mut shape = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                2,
                &[
                    ge(LinForm::Plus(x()), 1),
                    le(LinForm::Plus(x()), 3),
                    ge(LinForm::Plus(y()), 7),
                    le(LinForm::Plus(y()), 12),
                ],
            )
            .unwrap();
            let set: VarSet = [0usize].into_iter().collect();
            shape.fold_dims(&set, y()).unwrap();
            assert_eq!(shape.space_dim(), 1);
            let expected = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                1,
                &[ge(LinForm::Plus(x()), 1), le(LinForm::Plus(x()), 12)],
            )
            .unwrap();
            assert_eq!(shape, expected);
        }
    }

    #[test]
    fn test_fold_empty_set_is_noop() {
        let mut shape = bd(2, &[le(LinForm::Plus(x()), 1)]);
        let snapshot = shape.clone();
        shape.fold_dims(&VarSet::new(), y()).unwrap();
        assert_eq!(shape, snapshot);
        assert_eq!(shape.space_dim(), 2);
    }

    #[test]
    fn test_fold_validates_arguments() {
        let mut shape = bd(2, &[]);
        let set: VarSet = [1usize].into_iter().collect();
        assert!(matches!(
            shape.fold_dims(&set, y()),
            Err(Error::Dimension(_))
        ));
        let set: VarSet = [3usize].into_iter().collect();
        assert!(matches!(
            shape.fold_dims(&set, x()),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn test_expand_copies_constraints() {
        let shape = oct(
            2,
            &[
                ge(LinForm::Plus(x()), 1),
                le(LinForm::Plus(x()), 3),
                le(LinForm::Diff(x(), y()), 2),
            ],
        );
        let mut expanded = shape.clone();
        expanded.expand_dim(x(), 1).unwrap();
        assert_eq!(expanded.space_dim(), 3);
        let copy = Var::new(2);
        let b = expanded.to_box();
        assert_eq!(*b.interval(copy).lo(), Bound::int(1));
        assert_eq!(*b.interval(copy).hi(), Bound::int(3));
        // The copy carries the relational bound too.
        let expected_rel = le(LinForm::Diff(copy, y()), 2);
        assert!(expanded.constraints().contains(&expected_rel));
        // The copy and the original are mutually unconstrained.
        assert!(!expanded
            .constraints()
            .iter()
            .any(|c| matches!(c.form(), LinForm::Diff(a, b) if (a == x() && b == copy) || (a == copy && b == x()))));
    }

    #[test]
    fn test_fold_of_expand_contains_original() {
        let original = oct(
            2,
            &[
                ge(LinForm::Plus(x()), 1),
                le(LinForm::Plus(x()), 3),
                le(LinForm::Diff(x(), y()), 2),
            ],
        );
        let mut shape = original.clone();
        shape.expand_dim(x(), 2).unwrap();
        let added: VarSet = [2usize, 3].into_iter().collect();
        shape.fold_dims(&added, x()).unwrap();
        assert_eq!(shape.space_dim(), 2);
        assert!(shape.contains(&original).unwrap());
    }

    #[test]
    fn test_add_dims_project_pins_to_zero() {
        let mut shape = oct(1, &[ge(LinForm::Plus(x()), 2), le(LinForm::Plus(x()), 4)]);
        shape.close();
        shape.add_dims_project(2).unwrap();
        assert_eq!(shape.space_dim(), 3);
        // Closure was preserved by the direct update: the implied relational
        // bounds are already present without a recomputation.
        assert!(shape.state().borrow().status.is_closed());
        let b = shape.to_box();
        for v in [Var::new(1), Var::new(2)] {
            assert_eq!(*b.interval(v).lo(), Bound::zero());
            assert_eq!(*b.interval(v).hi(), Bound::zero());
        }
        let expected = oct(
            3,
            &[
                ge(LinForm::Plus(x()), 2),
                le(LinForm::Plus(x()), 4),
                eq(LinForm::Plus(Var::new(1)), 0),
                eq(LinForm::Plus(Var::new(2)), 0),
            ],
        );
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_concatenate_is_positional() {
        let mut a = bd(1, &[le(LinForm::Plus(x()), 1)]);
        let b = bd(2, &[ge(LinForm::Plus(x()), 5), le(LinForm::Diff(x(), y()), 0)]);
        a.concatenate_assign(&b).unwrap();
        assert_eq!(a.space_dim(), 3);
        let expected = bd(
            3,
            &[
                le(LinForm::Plus(x()), 1),
                ge(LinForm::Plus(y()), 5),
                le(LinForm::Diff(y(), Var::new(2)), 0),
            ],
        );
        assert_eq!(a, expected);
    }

    #[test]
    fn test_concatenate_empty_operand() {
        let mut a = bd(1, &[le(LinForm::Plus(x()), 1)]);
        let e = Shape::empty(Topology::BoundedDifference, CoeffKind::Rational, 2).unwrap();
        a.concatenate_assign(&e).unwrap();
        assert_eq!(a.space_dim(), 3);
        assert!(a.is_empty());
    }

    #[test]
    fn test_map_dims_permutes() {
        let mut shape = bd(2, &[le(LinForm::Diff(x(), y()), 1), le(LinForm::Plus(x()), 5)]);
        shape.map_dims(&[Some(1), Some(0)]).unwrap();
        let expected = bd(2, &[le(LinForm::Diff(y(), x()), 1), le(LinForm::Plus(y()), 5)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_map_dims_projects() {
        let z = Var::new(2);
        let mut shape = bd(
            3,
            &[le(LinForm::Diff(x(), y()), 1), le(LinForm::Diff(y(), z), 2)],
        );
        // Keep x as x1 and z as x0, dropping y.
        shape.map_dims(&[Some(1), None, Some(0)]).unwrap();
        assert_eq!(shape.space_dim(), 2);
        let expected = bd(2, &[le(LinForm::Diff(y(), x()), 3)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_map_dims_rejects_bad_maps() {
        let mut shape = bd(2, &[]);
        assert!(matches!(
            shape.map_dims(&[Some(0)]),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            shape.map_dims(&[Some(0), Some(0)]),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            shape.map_dims(&[Some(0), Some(5)]),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn test_box_round_trip() {
        let mut b = BoundBox::universe(3);
        b.set_interval(x(), Interval::closed(Bound::int(-1), Bound::int(4)));
        b.set_interval(y(), Interval::closed(Bound::NegInf, Bound::rat(7, 2)));
        for topology in [Topology::BoundedDifference, Topology::Octagon] {
            let shape = Shape::from_box(topology, CoeffKind::Rational, &b).unwrap();
            assert_eq!(shape.to_box(), b);
        }
    }

    #[test]
    fn test_box_open_sides() {
        let mut b = BoundBox::universe(1);
        b.set_interval(
            x(),
            Interval::new(Bound::int(0), false, Bound::int(5), false),
        );
        // Integers tighten the open sides exactly.
        let shape = Shape::from_box(Topology::Octagon, CoeffKind::Integer, &b).unwrap();
        let out = shape.to_box();
        assert_eq!(*out.interval(x()).lo(), Bound::int(1));
        assert_eq!(*out.interval(x()).hi(), Bound::int(4));
        // Rationals must over-approximate to the closed bounds.
        let shape = Shape::from_box(Topology::Octagon, CoeffKind::Rational, &b).unwrap();
        let out = shape.to_box();
        assert_eq!(*out.interval(x()).lo(), Bound::int(0));
        assert_eq!(*out.interval(x()).hi(), Bound::int(5));
    }

    #[test]
    fn test_from_box_empty() {
        let mut b = BoundBox::universe(2);
        b.set_interval(y(), Interval::empty());
        let shape = Shape::from_box(Topology::BoundedDifference, CoeffKind::Rational, &b).unwrap();
        assert!(shape.is_empty());
    }

    #[test]
    fn test_affine_image_shift() {
        for topology in [Topology::BoundedDifference, Topology::Octagon] {
            let mut shape = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                2,
                &[
                    ge(LinForm::Plus(x()), 0),
                    le(LinForm::Plus(x()), 2),
                    le(LinForm::Diff(x(), y()), 0),
                ],
            )
            .unwrap();
            shape
                .affine_image(x(), &AffineForm::var_offset(Sign::Pos, x(), Bound::int(1), Bound::int(1)))
                .unwrap();
            let expected = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                2,
                &[
                    ge(LinForm::Plus(x()), 1),
                    le(LinForm::Plus(x()), 3),
                    le(LinForm::Diff(x(), y()), 1),
                ],
            )
            .unwrap();
            assert_eq!(shape, expected);
        }
    }

    #[test]
    fn test_affine_image_nondeterministic_shift() {
        let mut shape = bd(1, &[eq(LinForm::Plus(x()), 0)]);
        shape
            .affine_image(
                x(),
                &AffineForm::var_offset(Sign::Pos, x(), Bound::int(0), Bound::PosInf),
            )
            .unwrap();
        let expected = bd(1, &[ge(LinForm::Plus(x()), 0)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_affine_image_reflect() {
        for topology in [Topology::BoundedDifference, Topology::Octagon] {
            let mut shape = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                1,
                &[ge(LinForm::Plus(x()), 1), le(LinForm::Plus(x()), 2)],
            )
            .unwrap();
            shape
                .affine_image(x(), &AffineForm::var(Sign::Neg, x()))
                .unwrap();
            let expected = Shape::from_constraints(
                topology,
                CoeffKind::Rational,
                1,
                &[ge(LinForm::Plus(x()), -2), le(LinForm::Plus(x()), -1)],
            )
            .unwrap();
            assert_eq!(shape, expected);
        }
    }

    #[test]
    fn test_affine_image_transfer() {
        let mut shape = oct(2, &[ge(LinForm::Plus(y()), 3), le(LinForm::Plus(y()), 4)]);
        shape
            .affine_image(x(), &AffineForm::var(Sign::Pos, y()))
            .unwrap();
        // x == y exactly, and x inherits y's bounds through closure.
        let expected = oct(
            2,
            &[
                eq(LinForm::Diff(x(), y()), 0),
                ge(LinForm::Plus(y()), 3),
                le(LinForm::Plus(y()), 4),
            ],
        );
        assert_eq!(shape, expected);
        let b = shape.to_box();
        assert_eq!(*b.interval(x()).lo(), Bound::int(3));
        assert_eq!(*b.interval(x()).hi(), Bound::int(4));
    }

    #[test]
    fn test_affine_image_interval() {
        let mut shape = bd(2, &[eq(LinForm::Plus(x()), 9), le(LinForm::Diff(x(), y()), 0)]);
        shape
            .affine_image(x(), &AffineForm::interval(Bound::int(5), Bound::int(6)))
            .unwrap();
        // Old bounds on x are gone; the relation to y was projected first.
        let b = shape.to_box();
        assert_eq!(*b.interval(x()).lo(), Bound::int(5));
        assert_eq!(*b.interval(x()).hi(), Bound::int(6));
        assert_eq!(*b.interval(y()).lo(), Bound::int(9));
    }

    #[test]
    fn test_affine_image_empty_window() {
        let mut shape = bd(1, &[le(LinForm::Plus(x()), 100)]);
        shape
            .affine_image(x(), &AffineForm::interval(Bound::int(1), Bound::int(0)))
            .unwrap();
        assert!(shape.is_empty());
    }

    #[test]
    fn test_affine_preimage_shift() {
        let mut shape = bd(1, &[ge(LinForm::Plus(x()), 0), le(LinForm::Plus(x()), 5)]);
        shape
            .affine_preimage(x(), &AffineForm::var_offset(Sign::Pos, x(), Bound::int(1), Bound::int(1)))
            .unwrap();
        let expected = bd(1, &[ge(LinForm::Plus(x()), -1), le(LinForm::Plus(x()), 4)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_affine_preimage_interval() {
        let mut shape = bd(
            2,
            &[
                ge(LinForm::Plus(x()), 0),
                le(LinForm::Plus(x()), 5),
                ge(LinForm::Plus(y()), 2),
                le(LinForm::Plus(y()), 3),
            ],
        );
        // x := [0, 1] can land in [0, 5]; the precondition frees x.
        shape
            .affine_preimage(x(), &AffineForm::interval(Bound::int(0), Bound::int(1)))
            .unwrap();
        let expected = bd(2, &[ge(LinForm::Plus(y()), 2), le(LinForm::Plus(y()), 3)]);
        assert_eq!(shape, expected);

        // A window disjoint from the target bounds has an empty preimage.
        let mut shape = bd(1, &[ge(LinForm::Plus(x()), 10), le(LinForm::Plus(x()), 20)]);
        shape
            .affine_preimage(x(), &AffineForm::interval(Bound::int(0), Bound::int(1)))
            .unwrap();
        assert!(shape.is_empty());
    }

    #[test]
    fn test_affine_preimage_transfer() {
        // After x := y, the shape { x in [3, 4] } comes from { y in [3, 4] }.
        let mut shape = oct(2, &[ge(LinForm::Plus(x()), 3), le(LinForm::Plus(x()), 4)]);
        shape
            .affine_preimage(x(), &AffineForm::var(Sign::Pos, y()))
            .unwrap();
        let expected = oct(2, &[ge(LinForm::Plus(y()), 3), le(LinForm::Plus(y()), 4)]);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_affine_image_then_preimage_contains_original() {
        let original = oct(
            2,
            &[
                ge(LinForm::Plus(x()), 0),
                le(LinForm::Plus(x()), 5),
                le(LinForm::Sum(x(), y()), 7),
            ],
        );
        let mut shape = original.clone();
        let form = AffineForm::var_offset(Sign::Pos, y(), Bound::int(-1), Bound::int(2));
        shape.affine_image(x(), &form).unwrap();
        shape.affine_preimage(x(), &form).unwrap();
        assert!(shape.contains(&original).unwrap());
    }

    #[test]
    fn test_display() {
        let shape = bd(2, &[le(LinForm::Diff(x(), y()), 2)]);
        assert_eq!(shape.to_string(), "x0 - x1 <= 2");
        assert_eq!(
            Shape::universe(Topology::Octagon, CoeffKind::Rational, 2)
                .unwrap()
                .to_string(),
            "true"
        );
        assert_eq!(
            Shape::empty(Topology::Octagon, CoeffKind::Rational, 2)
                .unwrap()
                .to_string(),
            "false"
        );
    }

    #[test]
    fn test_stats_attached() {
        let stats = Rc::new(Stats::new());
        let mut shape = bd(2, &[le(LinForm::Plus(x()), 1)]);
        shape.attach_stats(stats.clone());
        shape.is_empty();
        shape.is_empty();
        // The second query hits the status flags, not the engine.
        assert_eq!(stats.closures(), 1);
        shape.minimized_constraints();
        assert_eq!(stats.reductions(), 1);
    }

    #[test]
    fn test_constraints_of_empty() {
        let e = Shape::empty(Topology::BoundedDifference, CoeffKind::Rational, 2).unwrap();
        let cs = e.constraints();
        assert_eq!(cs.len(), 2);
        let unsat = Shape::from_constraints(
            Topology::BoundedDifference,
            CoeffKind::Rational,
            2,
            &cs,
        )
        .unwrap();
        assert!(unsat.is_empty());
    }
}
