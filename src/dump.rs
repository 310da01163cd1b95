//! Ascii dump and load for shapes.
//!
//! A debugging facility with an exact round-trip guarantee: `load(dump(x))`
//! rebuilds the same shape, raw matrix and status included (the minimality
//! flag is recomputed rather than dumped, since the minimal form is a
//! cache). Loading rejects truncated, malformed, or dimensionally
//! inconsistent input with an error, never a panic.
//!
//! # Format
//!
//! ```text
//! shape
//! topology octagon          # or: bdiff
//! coeff rational            # or: integer
//! space_dim 2
//! status closed             # status flag tokens, `-` when none hold
//! rows 4
//! 0 5 +inf -1/2
//! ...                       # one line per row, `rows` tokens each
//! ```

use std::fmt::Write as _;

use crate::bound::Bound;
use crate::errors::ParseError;
use crate::matrix::SquareMatrix;
use crate::shape::{CoeffKind, Shape, Topology};
use crate::status::Status;
use crate::types::MAX_SPACE_DIM;

fn topology_tag(topology: Topology) -> &'static str {
    match topology {
        Topology::BoundedDifference => "bdiff",
        Topology::Octagon => "octagon",
    }
}

fn coeff_tag(coeff: CoeffKind) -> &'static str {
    match coeff {
        CoeffKind::Rational => "rational",
        CoeffKind::Integer => "integer",
    }
}

impl Shape {
    /// Serializes the shape to the line-oriented ascii format.
    pub fn dump(&self) -> String {
        let st = self.state().borrow();
        let mut out = String::new();
        writeln!(out, "shape").unwrap();
        writeln!(out, "topology {}", topology_tag(self.topology())).unwrap();
        writeln!(out, "coeff {}", coeff_tag(self.coeff_kind())).unwrap();
        writeln!(out, "space_dim {}", self.space_dim()).unwrap();
        // The reduced flag marks a cache, which is not dumped; dropping it
        // keeps dump(load(dump(x))) == dump(x).
        let mut status = st.status;
        status.clear_reduced();
        writeln!(out, "status {}", status.tokens()).unwrap();
        let m = &st.matrix;
        writeln!(out, "rows {}", m.n()).unwrap();
        for i in 0..m.n() {
            let row: Vec<String> = (0..m.n()).map(|j| m.at(i, j).to_string()).collect();
            writeln!(out, "{}", row.join(" ")).unwrap();
        }
        out
    }

    /// Parses a shape from the ascii format produced by [`Shape::dump`].
    pub fn load(src: &str) -> Result<Shape, ParseError> {
        let mut lines = src.lines();

        let magic = next_line(&mut lines)?;
        if magic.trim() != "shape" {
            return Err(ParseError(format!("bad magic line: {:?}", magic)));
        }

        let topology = match field(next_line(&mut lines)?, "topology")? {
            "bdiff" => Topology::BoundedDifference,
            "octagon" => Topology::Octagon,
            other => return Err(ParseError(format!("unknown topology {:?}", other))),
        };
        let coeff = match field(next_line(&mut lines)?, "coeff")? {
            "rational" => CoeffKind::Rational,
            "integer" => CoeffKind::Integer,
            other => return Err(ParseError(format!("unknown coeff kind {:?}", other))),
        };
        let dim: usize = field(next_line(&mut lines)?, "space_dim")?
            .parse()
            .map_err(|_| ParseError("bad space_dim value".to_string()))?;
        if dim > MAX_SPACE_DIM {
            return Err(ParseError(format!("space_dim {} is too large", dim)));
        }
        let status_line = next_line(&mut lines)?;
        let status_tokens = status_line
            .strip_prefix("status ")
            .ok_or_else(|| ParseError(format!("expected status line, got {:?}", status_line)))?;
        let status = Status::from_tokens(status_tokens)
            .ok_or_else(|| ParseError(format!("bad status flags {:?}", status_tokens)))?;

        let rows: usize = field(next_line(&mut lines)?, "rows")?
            .parse()
            .map_err(|_| ParseError("bad rows value".to_string()))?;
        let expected = match topology {
            Topology::BoundedDifference => dim + 1,
            Topology::Octagon => 2 * dim,
        };
        if rows != expected {
            return Err(ParseError(format!(
                "rows {} does not match a {}-dimensional {} shape (expected {})",
                rows,
                dim,
                topology_tag(topology),
                expected
            )));
        }

        let mut matrix = SquareMatrix::universe(rows);
        for i in 0..rows {
            let line = next_line(&mut lines)?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != rows {
                return Err(ParseError(format!(
                    "row {} has {} entries, expected {}",
                    i,
                    tokens.len(),
                    rows
                )));
            }
            for (j, token) in tokens.iter().enumerate() {
                let bound: Bound = token.parse().map_err(ParseError)?;
                matrix.set(i, j, bound);
            }
        }
        if lines.any(|l| !l.trim().is_empty()) {
            return Err(ParseError("trailing content after matrix".to_string()));
        }

        Ok(Shape::from_raw_parts(topology, coeff, dim, status, matrix))
    }
}

fn next_line<'a>(lines: &mut std::str::Lines<'a>) -> Result<&'a str, ParseError> {
    lines
        .next()
        .ok_or_else(|| ParseError("unexpected end of input".to_string()))
}

fn field<'a>(line: &'a str, key: &str) -> Result<&'a str, ParseError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(value), None) if k == key => Ok(value),
        _ => Err(ParseError(format!("expected `{} <value>`, got {:?}", key, line))),
    }
}
