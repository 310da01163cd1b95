//! Extended-arithmetic bounds: exact rationals together with ±∞.
//!
//! Every matrix entry of a shape is a [`Bound`]. Arithmetic saturates toward
//! the infinities instead of failing, so the closure algorithms never have a
//! numeric error path: losing precision to `+inf` is a sound (if unwelcome)
//! outcome, not an error.

use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

/// A bound value: `-inf`, an exact rational, or `+inf`.
///
/// The total order is `-inf < finite < +inf`, with finite values ordered as
/// rationals. This is exactly the derived order, since the variants are
/// declared smallest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(BigRational),
    PosInf,
}

/// Rounding direction for conversions that cannot be exact.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoundDir {
    /// Toward -∞.
    Down,
    /// Toward +∞.
    Up,
}

impl Bound {
    /// The finite bound 0.
    pub fn zero() -> Self {
        Bound::Finite(BigRational::zero())
    }

    /// A finite integer bound.
    pub fn int(value: i64) -> Self {
        Bound::Finite(BigRational::from_integer(BigInt::from(value)))
    }

    /// A finite rational bound `numer/denom`.
    ///
    /// # Panics
    ///
    /// Panics if `denom == 0`.
    pub fn rat(numer: i64, denom: i64) -> Self {
        Bound::Finite(BigRational::new(BigInt::from(numer), BigInt::from(denom)))
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Bound::Finite(_))
    }
    pub fn is_pos_inf(&self) -> bool {
        matches!(self, Bound::PosInf)
    }
    pub fn is_neg_inf(&self) -> bool {
        matches!(self, Bound::NegInf)
    }

    pub fn as_finite(&self) -> Option<&BigRational> {
        match self {
            Bound::Finite(r) => Some(r),
            _ => None,
        }
    }

    /// Saturating addition.
    ///
    /// `+inf` dominates: the closure relaxation only ever adds two edge
    /// weights after checking that neither is `+inf`, so the
    /// `+inf + -inf` case is not reachable from the engine; if a caller
    /// produces it anyway the result is `+inf`, which is sound for an upper
    /// bound.
    pub fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a + b),
        }
    }

    /// `self + self`.
    pub fn double(&self) -> Bound {
        self.add(self)
    }

    /// Exact halving. Infinities halve to themselves.
    pub fn half(&self) -> Bound {
        match self {
            Bound::Finite(r) => Bound::Finite(r / BigRational::from_integer(BigInt::from(2))),
            inf => inf.clone(),
        }
    }

    /// Halving rounded toward -∞: `⌊self / 2⌋`.
    ///
    /// This is the rounding rule used when tightening integral octagons: an
    /// upper bound rounded down is the nearest feasible integer bound.
    pub fn half_floor(&self) -> Bound {
        match self {
            Bound::Finite(r) => {
                Bound::Finite((r / BigRational::from_integer(BigInt::from(2))).floor())
            }
            inf => inf.clone(),
        }
    }

    /// Rounds toward -∞ to the nearest integer.
    pub fn floor(&self) -> Bound {
        match self {
            Bound::Finite(r) => Bound::Finite(r.floor()),
            inf => inf.clone(),
        }
    }

    /// Rounds toward +∞ to the nearest integer.
    pub fn ceil(&self) -> Bound {
        match self {
            Bound::Finite(r) => Bound::Finite(r.ceil()),
            inf => inf.clone(),
        }
    }

    pub fn is_integral(&self) -> bool {
        match self {
            Bound::Finite(r) => r.is_integer(),
            _ => true,
        }
    }

    /// Converts a float into an exact bound. Infinities map to the infinite
    /// bounds; `NaN` has no bound and yields `None`. Every finite `f64` is a
    /// rational, so no rounding is involved here.
    pub fn from_f64(value: f64) -> Option<Bound> {
        if value.is_nan() {
            return None;
        }
        if value == f64::INFINITY {
            return Some(Bound::PosInf);
        }
        if value == f64::NEG_INFINITY {
            return Some(Bound::NegInf);
        }
        BigRational::from_f64(value).map(Bound::Finite)
    }

    /// Converts to `f64` with an explicit rounding direction, so callers can
    /// stay sound when exporting bounds to floating point.
    pub fn to_f64(&self, dir: RoundDir) -> f64 {
        let r = match self {
            Bound::NegInf => return f64::NEG_INFINITY,
            Bound::PosInf => return f64::INFINITY,
            Bound::Finite(r) => r,
        };
        let approx = match r.to_f64() {
            Some(x) if x.is_finite() => x,
            // Magnitude beyond f64 range: saturate in the sound direction.
            _ => {
                return if r.is_negative() {
                    match dir {
                        RoundDir::Down => f64::NEG_INFINITY,
                        RoundDir::Up => f64::MIN,
                    }
                } else {
                    match dir {
                        RoundDir::Down => f64::MAX,
                        RoundDir::Up => f64::INFINITY,
                    }
                };
            }
        };
        let back = BigRational::from_f64(approx).expect("finite f64 is rational");
        match dir {
            RoundDir::Down => {
                if back <= *r {
                    approx
                } else {
                    next_down(approx)
                }
            }
            RoundDir::Up => {
                if back >= *r {
                    approx
                } else {
                    next_up(approx)
                }
            }
        }
    }
}

impl Neg for Bound {
    type Output = Bound;

    fn neg(self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::PosInf => Bound::NegInf,
            Bound::Finite(r) => Bound::Finite(-r),
        }
    }
}

impl Neg for &Bound {
    type Output = Bound;

    fn neg(self) -> Bound {
        self.clone().neg()
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-inf"),
            Bound::PosInf => write!(f, "+inf"),
            Bound::Finite(r) => write!(f, "{}", r),
        }
    }
}

impl FromStr for Bound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+inf" => Ok(Bound::PosInf),
            "-inf" => Ok(Bound::NegInf),
            _ => s
                .parse()
                .map(Bound::Finite)
                .map_err(|_| format!("invalid bound token: {:?}", s)),
        }
    }
}

fn next_up(x: f64) -> f64 {
    debug_assert!(x.is_finite());
    if x == 0.0 {
        f64::from_bits(1)
    } else if x > 0.0 {
        f64::from_bits(x.to_bits() + 1)
    } else {
        f64::from_bits(x.to_bits() - 1)
    }
}

fn next_down(x: f64) -> f64 {
    -next_up(-x)
}
