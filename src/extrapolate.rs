//! Extrapolation operators: widening and narrowing.
//!
//! Widening forces termination of ascending fixpoint iterations: comparing
//! the current iterate against the previous one, every bound that grew is
//! dropped to `+inf`, so each matrix entry can change at most a bounded
//! number of times. The callers' contract is `prev ⊆ self`; under it the
//! result contains both iterates.
//!
//! The previous iterate is closed before the comparison; the current one is
//! used as stored. Closing the current iterate here could resurrect bounds
//! a previous widening dropped and forfeit termination.

use std::rc::Rc;

use log::debug;

use crate::bound::Bound;
use crate::constraint::Constraint;
use crate::errors::Error;
use crate::shape::Shape;

impl Shape {
    /// Standard widening against the previous iterate: entries that grew
    /// are dropped to `+inf`, entries that held are kept.
    pub fn widening_assign(&mut self, prev: &Shape) -> Result<(), Error> {
        self.widen_with(prev, None, &[])
    }

    /// Widening with a token budget: while `*tokens > 0`, an entry that
    /// would be dropped is kept instead and one token is consumed. The
    /// counter is shared across calls, bounding the extra precision over a
    /// whole fixpoint computation rather than one step.
    pub fn widening_assign_with_tokens(
        &mut self,
        prev: &Shape,
        tokens: &mut u64,
    ) -> Result<(), Error> {
        self.widen_with(prev, Some(tokens), &[])
    }

    /// Widening guided by a constraint set: an entry that would be dropped
    /// to `+inf` is reinstated at a guiding constraint's bound when the
    /// previous iterate satisfies that constraint and the bound also covers
    /// the current entry. The result still contains both iterates.
    pub fn limited_widening_assign(
        &mut self,
        prev: &Shape,
        guards: &[Constraint],
    ) -> Result<(), Error> {
        self.widen_with(prev, None, guards)
    }

    fn widen_with(
        &mut self,
        prev: &Shape,
        mut tokens: Option<&mut u64>,
        guards: &[Constraint],
    ) -> Result<(), Error> {
        self.check_compat(prev, "widening")?;
        // Validate the guards up front; nothing below can fail.
        let mut guard_cells: Vec<((usize, usize), Bound)> = Vec::new();
        for c in guards {
            for (form, rhs) in c.upper_atoms() {
                let (cells, value) = self.atom_cells(form, &rhs)?;
                for cell in cells {
                    guard_cells.push((cell, value.clone()));
                }
            }
        }

        prev.close();
        if prev.state().borrow().status.is_empty() {
            // Widening with bottom keeps the current iterate.
            return Ok(());
        }
        if self.state().borrow().status.is_empty() {
            *self.state().borrow_mut() = prev.state().borrow().clone();
            return Ok(());
        }
        self.note_widening();

        let prev_state = prev.state().borrow();
        let pm = &prev_state.matrix;
        let mut st = self.state().borrow_mut();
        // Snapshot of the current entries, for the guard threshold test.
        let before = st.matrix.clone();
        let m = Rc::make_mut(&mut st.matrix);
        let n = m.n();
        let mut dropped = 0usize;
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if *m.at(i, j) <= *pm.at(i, j) {
                    continue;
                }
                if m.at(i, j).is_pos_inf() {
                    // Already unconstrained, nothing to drop.
                    continue;
                }
                // The bound grew since the previous iterate.
                if let Some(budget) = tokens.as_deref_mut() {
                    if *budget > 0 {
                        *budget -= 1;
                        continue;
                    }
                }
                m.set(i, j, Bound::PosInf);
                dropped += 1;
            }
        }
        for ((i, j), bound) in guard_cells {
            if m.at(i, j).is_pos_inf()
                && *pm.at(i, j) <= bound
                && *before.at(i, j) <= bound
            {
                m.set(i, j, bound);
            }
        }
        debug!("widening: dropped {} bounds", dropped);
        st.clear_derived();
        Ok(())
    }

    /// Narrowing against a refined iterate: only unbounded entries are
    /// improved, so a descending iteration cannot oscillate.
    pub fn narrowing_assign(&mut self, other: &Shape) -> Result<(), Error> {
        self.check_compat(other, "narrowing")?;
        other.close();
        if other.state().borrow().status.is_empty() {
            self.install_empty();
            return Ok(());
        }
        if self.state().borrow().status.is_empty() {
            return Ok(());
        }
        let other_state = other.state().borrow();
        let om = &other_state.matrix;
        let mut st = self.state().borrow_mut();
        let m = Rc::make_mut(&mut st.matrix);
        let n = m.n();
        let mut changed = false;
        for i in 0..n {
            for j in 0..n {
                if i != j && m.at(i, j).is_pos_inf() && om.at(i, j).is_finite() {
                    m.set(i, j, om.at(i, j).clone());
                    changed = true;
                }
            }
        }
        if changed {
            st.clear_derived();
        }
        Ok(())
    }
}
