//! Closure and reduction of bound matrices.
//!
//! Closure is all-pairs shortest paths: every derivable bound is made
//! explicit by saturating the triangle inequality
//! `m[i][j] <= m[i][k] + m[k][j]`. Octagon matrices additionally run a
//! strengthening pass that propagates unary bounds through the
//! negated-mirror cells, and (for integral coefficients) a tightening pass
//! that rounds the mirror cells down to the nearest feasible integer.
//!
//! Reduction is the inverse concern: dropping every entry implied by the
//! others, producing the unique minimal matrix used for canonical
//! comparison and constraint output.

use log::{debug, trace};

use crate::bound::Bound;
use crate::matrix::SquareMatrix;
use crate::types::Occ;

/// Floyd–Warshall relaxation over the whole matrix.
///
/// Returns `false` if a diagonal entry went negative, i.e. the constraint
/// system is inconsistent. Matrix entries are upper bounds, so `+inf` edges
/// are skipped instead of added.
pub(crate) fn shortest_path_closure(m: &mut SquareMatrix) -> bool {
    let n = m.n();
    debug!("closure: relaxing {} nodes", n);
    for k in 0..n {
        for i in 0..n {
            let ik = m.at(i, k).clone();
            if ik.is_pos_inf() {
                continue;
            }
            for j in 0..n {
                let kj = m.at(k, j);
                if kj.is_pos_inf() {
                    continue;
                }
                let through = ik.add(kj);
                if m.tighten(i, j, &through) {
                    trace!("closure: ({}, {}) tightened via {} to {}", i, j, k, through);
                }
            }
        }
    }
    diagonal_consistent(m)
}

fn diagonal_consistent(m: &SquareMatrix) -> bool {
    let zero = Bound::zero();
    for i in 0..m.n() {
        if *m.at(i, i) < zero {
            debug!("closure: negative self-loop at node {}, shape is empty", i);
            return false;
        }
    }
    true
}

/// Octagon strengthening: for every cell, the unary bounds on its two
/// endpoints imply `m[i][j] <= m[i][bar i]/2 + m[bar j][j]/2`. With
/// integral coefficients the halves round toward -∞, the nearest feasible
/// integer for an upper bound.
pub(crate) fn strengthen(m: &mut SquareMatrix, integral: bool) {
    let n = m.n();
    debug_assert!(n % 2 == 0, "strengthening needs an octagon matrix");
    let half = |b: &Bound| if integral { b.half_floor() } else { b.half() };
    let halves: Vec<Bound> = (0..n)
        .map(|i| half(m.at(i, Occ::from_index(i).bar().index())))
        .collect();
    for i in 0..n {
        if halves[i].is_pos_inf() {
            continue;
        }
        for j in 0..n {
            let jbar = Occ::from_index(j).bar().index();
            if halves[jbar].is_pos_inf() {
                continue;
            }
            let cand = halves[i].add(&halves[jbar]);
            m.tighten(i, j, &cand);
        }
    }
}

/// Integral tightening of the mirror cells: `m[i][bar i]` encodes `2x <= c`,
/// and for integer-valued `x` only even `c` is feasible.
pub(crate) fn tighten_integral(m: &mut SquareMatrix) {
    let n = m.n();
    debug_assert!(n % 2 == 0);
    for i in 0..n {
        let bar = Occ::from_index(i).bar().index();
        let tightened = m.at(i, bar).half_floor().double();
        m.tighten(i, bar, &tightened);
    }
}

/// Strong closure of an octagon matrix: shortest paths, then tightening
/// (integral coefficients only), then one strengthening pass. Returns
/// `false` on inconsistency.
pub(crate) fn strong_closure(m: &mut SquareMatrix, integral: bool) -> bool {
    if !shortest_path_closure(m) {
        return false;
    }
    if integral {
        tighten_integral(m);
    }
    strengthen(m, integral);
    // Strengthening touches the diagonal too: with integral coefficients a
    // pair of odd mirror bounds can reveal emptiness only here.
    diagonal_consistent(m)
}

/// Computes the canonical reduced form of a closed, consistent matrix.
///
/// Nodes connected by zero-weight cycles form equivalence classes; inside a
/// class only the index-ordered cycle through its members is kept. Between
/// class leaders an entry is dropped when some third leader provides an
/// equally good two-step path (and, on octagons, when the strengthening
/// half-sum implies it). Octagon output keeps coherent mirror pairs
/// together so that the result is still a valid matrix.
pub(crate) fn reduce(m: &SquareMatrix, octagon: bool) -> SquareMatrix {
    let n = m.n();
    let zero = Bound::zero();
    debug!("reduce: {} nodes", n);

    // Zero-equivalence classes; leader = smallest member.
    let mut leader: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in 0..i {
            if leader[j] != j {
                continue;
            }
            if m.at(i, j).add(m.at(j, i)) == zero {
                leader[i] = j;
                break;
            }
        }
    }

    let mut out = SquareMatrix::universe(n);
    for i in 0..n {
        out.set(i, i, Bound::PosInf);
    }

    // Chain each class: members in increasing order, cycle closed at the end.
    for l in 0..n {
        if leader[l] != l {
            continue;
        }
        let members: Vec<usize> = (l..n).filter(|&i| leader[i] == l).collect();
        if members.len() < 2 {
            continue;
        }
        for w in members.windows(2) {
            out.set(w[0], w[1], m.at(w[0], w[1]).clone());
        }
        let last = *members.last().unwrap();
        out.set(last, l, m.at(last, l).clone());
    }

    // Non-redundant entries between distinct leaders.
    for i in 0..n {
        if leader[i] != i {
            continue;
        }
        'cell: for j in 0..n {
            if leader[j] != j || i == j {
                continue;
            }
            let direct = m.at(i, j);
            if direct.is_pos_inf() {
                continue;
            }
            for k in 0..n {
                if leader[k] != k || k == i || k == j {
                    continue;
                }
                let via = m.at(i, k);
                if via.is_pos_inf() {
                    continue;
                }
                if via.add(m.at(k, j)) <= *direct {
                    trace!("reduce: ({}, {}) implied via {}", i, j, k);
                    continue 'cell;
                }
            }
            if octagon {
                let ibar = Occ::from_index(i).bar().index();
                let jbar = Occ::from_index(j).bar().index();
                // The half-sum implication, except for the mirror cells
                // themselves (the witness would be the entry itself).
                if j != ibar {
                    let implied = m.at(i, ibar).half().add(&m.at(jbar, j).half());
                    if implied <= *direct {
                        trace!("reduce: ({}, {}) implied by unary halves", i, j);
                        continue 'cell;
                    }
                }
            }
            out.set(i, j, direct.clone());
        }
    }

    // Keep octagon output coherent: an entry and its mirror stand for the
    // same constraint and travel as a pair.
    if octagon {
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if out.at(i, j).is_finite() {
                    let mi = Occ::from_index(j).bar().index();
                    let mj = Occ::from_index(i).bar().index();
                    let value = out.at(i, j).clone();
                    out.set(mi, mj, value);
                }
            }
        }
    }

    out
}
