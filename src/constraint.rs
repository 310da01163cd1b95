//! Linear constraints in the restricted two-variable fragment.
//!
//! A [`Constraint`] is one of `±x ⋈ c`, `x - y ⋈ c`, `x + y ⋈ c` or
//! `-x - y ⋈ c` with `⋈ ∈ {<=, >=, ==}` and an exact rational right-hand
//! side. This is precisely the fragment the shape matrices can represent;
//! anything more general is rejected at construction time rather than
//! silently approximated.

use std::collections::BTreeMap;
use std::fmt;

use num_rational::BigRational;

use crate::errors::Error;
use crate::types::Var;

/// Relation symbol of a constraint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rel {
    Le,
    Ge,
    Eq,
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rel::Le => write!(f, "<="),
            Rel::Ge => write!(f, ">="),
            Rel::Eq => write!(f, "=="),
        }
    }
}

/// Left-hand side of a constraint: a unit-coefficient combination of at
/// most two distinct variables.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinForm {
    /// `+x`
    Plus(Var),
    /// `-x`
    Minus(Var),
    /// `x - y`
    Diff(Var, Var),
    /// `x + y`
    Sum(Var, Var),
    /// `-x - y`
    NegSum(Var, Var),
}

impl LinForm {
    /// The variables mentioned by the form.
    pub fn vars(&self) -> (Var, Option<Var>) {
        match *self {
            LinForm::Plus(v) | LinForm::Minus(v) => (v, None),
            LinForm::Diff(a, b) | LinForm::Sum(a, b) | LinForm::NegSum(a, b) => (a, Some(b)),
        }
    }

    /// The largest variable mentioned.
    pub fn max_var(&self) -> Var {
        match self.vars() {
            (a, Some(b)) => a.max(b),
            (a, None) => a,
        }
    }

    /// True if the form mentions two variables (relational constraint).
    pub fn is_relational(&self) -> bool {
        matches!(self, LinForm::Diff(..) | LinForm::Sum(..) | LinForm::NegSum(..))
    }

    /// True for the sum forms, which only octagons can represent.
    pub fn is_sum(&self) -> bool {
        matches!(self, LinForm::Sum(..) | LinForm::NegSum(..))
    }

    /// The arithmetic negation of the form: `-(x - y) = y - x` and so on.
    pub fn negated(&self) -> LinForm {
        match *self {
            LinForm::Plus(v) => LinForm::Minus(v),
            LinForm::Minus(v) => LinForm::Plus(v),
            LinForm::Diff(a, b) => LinForm::Diff(b, a),
            LinForm::Sum(a, b) => LinForm::NegSum(a, b),
            LinForm::NegSum(a, b) => LinForm::Sum(a, b),
        }
    }

    fn check(&self) -> Result<(), Error> {
        if let (a, Some(b)) = self.vars() {
            if a == b {
                return Err(Error::Representation(format!(
                    "constraint mentions {} twice",
                    a
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for LinForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LinForm::Plus(v) => write!(f, "{}", v),
            LinForm::Minus(v) => write!(f, "-{}", v),
            LinForm::Diff(a, b) => write!(f, "{} - {}", a, b),
            LinForm::Sum(a, b) => write!(f, "{} + {}", a, b),
            LinForm::NegSum(a, b) => write!(f, "-{} - {}", a, b),
        }
    }
}

/// A constraint `form ⋈ rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    form: LinForm,
    rel: Rel,
    rhs: BigRational,
}

impl Constraint {
    /// Builds a constraint, rejecting forms that mention one variable
    /// twice.
    pub fn new(form: LinForm, rel: Rel, rhs: BigRational) -> Result<Self, Error> {
        form.check()?;
        Ok(Self { form, rel, rhs })
    }

    /// Builds a constraint with an integer right-hand side.
    pub fn new_int(form: LinForm, rel: Rel, rhs: i64) -> Result<Self, Error> {
        Self::new(form, rel, BigRational::from_integer(rhs.into()))
    }

    /// Builds a constraint from a coefficient list, the entry point used
    /// when importing constraints from a general-polyhedron collaborator.
    ///
    /// Coefficients for the same variable are summed first; zero
    /// coefficients are dropped. Rejects anything outside the
    /// two-variable, unit-coefficient fragment.
    pub fn from_coeffs(
        coeffs: &[(Var, i64)],
        rel: Rel,
        rhs: BigRational,
    ) -> Result<Self, Error> {
        let mut merged: BTreeMap<Var, i64> = BTreeMap::new();
        for &(var, c) in coeffs {
            *merged.entry(var).or_insert(0) += c;
        }
        merged.retain(|_, c| *c != 0);

        let mut terms = merged.into_iter();
        let form = match (terms.next(), terms.next(), terms.next()) {
            (_, _, Some(_)) => {
                return Err(Error::Representation(
                    "constraint mentions more than two variables".to_string(),
                ));
            }
            (None, _, _) => {
                return Err(Error::Representation(
                    "constraint mentions no variables".to_string(),
                ));
            }
            (Some((v, c)), None, _) => {
                if c.abs() != 1 {
                    return Err(Error::Representation(format!(
                        "non-unit coefficient {} for {}",
                        c, v
                    )));
                }
                if c > 0 {
                    LinForm::Plus(v)
                } else {
                    LinForm::Minus(v)
                }
            }
            (Some((a, ca)), Some((b, cb)), _) => {
                if ca.abs() != 1 || cb.abs() != 1 {
                    return Err(Error::Representation(format!(
                        "non-unit coefficients {}*{} {}*{}",
                        ca, a, cb, b
                    )));
                }
                match (ca > 0, cb > 0) {
                    (true, true) => LinForm::Sum(a, b),
                    (true, false) => LinForm::Diff(a, b),
                    (false, true) => LinForm::Diff(b, a),
                    (false, false) => LinForm::NegSum(a, b),
                }
            }
        };
        Self::new(form, rel, rhs)
    }

    pub fn form(&self) -> LinForm {
        self.form
    }
    pub fn rel(&self) -> Rel {
        self.rel
    }
    pub fn rhs(&self) -> &BigRational {
        &self.rhs
    }

    /// The largest variable mentioned.
    pub fn max_var(&self) -> Var {
        self.form.max_var()
    }

    /// Normalizes to upper-bound atoms `form' <= c`: one for `<=`, the
    /// negated one for `>=`, both for `==`.
    pub fn upper_atoms(&self) -> Vec<(LinForm, BigRational)> {
        match self.rel {
            Rel::Le => vec![(self.form, self.rhs.clone())],
            Rel::Ge => vec![(self.form.negated(), -self.rhs.clone())],
            Rel::Eq => vec![
                (self.form, self.rhs.clone()),
                (self.form.negated(), -self.rhs.clone()),
            ],
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.form, self.rel, self.rhs)
    }
}
