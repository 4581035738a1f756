//! Affine and quasi-affine index analysis.
//!
//! An index expression is affine over a list of iteration variables when it
//! can be written as `c0 + c1*v1 + ... + cn*vn` with integer coefficients:
//! `aff(v) = constant + sum(coeffs[i] * v[i])`.
//!
//! A load `B[idx_0, ..., idx_m]` is a bijection from a domain onto a box when
//! every index dimension is a digit `(F // lower) % extent` of a fused sum
//! `F` (either operator may be missing). Each fused sum is affine and
//! enumerates its variables in mixed radix: sorted by coefficient, the
//! smallest is 1, each next one is the previous coefficient times the
//! previous extent and the constant is 0. The digits taken from one sum must
//! tile its span exactly. Unit-extent variables always take the value 0 and
//! are ignored.

use crate::ir::expr::{BinaryOp, Expr};
use std::cmp::Reverse;
use std::fmt;

/// An affine expression over a fixed list of variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    /// Coefficient of each variable (index = position in the variable list)
    pub coeffs: Vec<i64>,
}

impl AffineExpr {
    pub fn constant(value: i64, n_var: usize) -> Self {
        Self { constant: value, coeffs: vec![0; n_var] }
    }

    pub fn var(index: usize, n_var: usize) -> Self {
        let mut coeffs = vec![0; n_var];
        if index < n_var {
            coeffs[index] = 1;
        }
        Self { constant: 0, coeffs }
    }

    /// Linearize `expr` over `vars`. `None` when the expression is not
    /// affine, mentions other variables, touches memory or overflows.
    pub fn from_expr(expr: &Expr, vars: &[String]) -> Option<Self> {
        let n = vars.len();
        match expr {
            Expr::Int(v) => Some(Self::constant(*v, n)),
            Expr::Var(name) => vars.iter().position(|v| v == name).map(|i| Self::var(i, n)),
            Expr::Binary { op, lhs, rhs } => {
                let a = Self::from_expr(lhs, vars)?;
                let b = Self::from_expr(rhs, vars)?;
                match op {
                    BinaryOp::Add => a.checked_add(&b),
                    BinaryOp::Sub => a.checked_sub(&b),
                    BinaryOp::Mul => match (a.as_constant(), b.as_constant()) {
                        (Some(c), _) => b.checked_scale(c),
                        (_, Some(c)) => a.checked_scale(c),
                        _ => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    pub fn coeff(&self, index: usize) -> i64 {
        self.coeffs.get(index).copied().unwrap_or(0)
    }

    /// Multiply by a constant. `None` on overflow.
    pub fn checked_scale(&self, factor: i64) -> Option<Self> {
        Some(Self {
            constant: self.constant.checked_mul(factor)?,
            coeffs: self.coeffs.iter().map(|c| c.checked_mul(factor)).collect::<Option<_>>()?,
        })
    }

    /// Term-wise sum. `None` on overflow.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        let n = self.coeffs.len().max(other.coeffs.len());
        Some(Self {
            constant: self.constant.checked_add(other.constant)?,
            coeffs: (0..n)
                .map(|i| self.coeff(i).checked_add(other.coeff(i)))
                .collect::<Option<_>>()?,
        })
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.checked_add(&other.checked_scale(-1)?)
    }

    /// Convert to a string with variable names.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let mut terms = Vec::new();
        for (i, &c) in self.coeffs.iter().enumerate() {
            let name = names.get(i).map(String::as_str).unwrap_or("?");
            match c {
                0 => {}
                1 => terms.push(name.to_string()),
                _ => terms.push(format!("{}*{}", c, name)),
            }
        }
        if self.constant != 0 || terms.is_empty() {
            terms.push(self.constant.to_string());
        }
        terms.join(" + ")
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (0..self.coeffs.len()).map(|i| format!("x{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&names))
    }
}

/// One variable of a fused sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadixTerm {
    /// Position of the variable in the domain
    pub var: usize,
    pub coeff: i64,
    pub extent: i64,
}

/// An affine sum of domain variables in mixed radix, innermost term first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedSum {
    pub terms: Vec<RadixTerm>,
    /// Number of values the sum takes
    pub span: i64,
}

/// Index dimension `(sum // lower) % extent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digit {
    /// Position of the fused sum; `None` for an index that is always 0
    pub sum: Option<usize>,
    pub lower: i64,
    pub extent: i64,
}

/// `index` read as `(aff // lower) % modulus`.
fn split_index(index: &Expr, names: &[String]) -> Option<(AffineExpr, i64, Option<i64>)> {
    if let Expr::Binary { op: BinaryOp::FloorMod, lhs, rhs } = index {
        let modulus = rhs.as_int().filter(|m| *m > 0)?;
        let (aff, lower) = split_div(lhs, names)?;
        return Some((aff, lower, Some(modulus)));
    }
    let (aff, lower) = split_div(index, names)?;
    Some((aff, lower, None))
}

fn split_div(index: &Expr, names: &[String]) -> Option<(AffineExpr, i64)> {
    match index {
        Expr::Binary { op: BinaryOp::FloorDiv, lhs, rhs } => {
            let divisor = rhs.as_int().filter(|c| *c > 0)?;
            // (x // a) // b == x // (a * b) for positive a and b
            let (aff, lower) = split_div(lhs, names)?;
            Some((aff, lower.checked_mul(divisor)?))
        }
        _ => Some((AffineExpr::from_expr(index, names)?, 1)),
    }
}

/// Mixed-radix terms of `aff`, innermost first.
fn radix_terms(aff: &AffineExpr, vars: &[(String, i64)], index: &Expr) -> Result<FusedSum, String> {
    let mut terms: Vec<RadixTerm> = vars
        .iter()
        .enumerate()
        .filter(|(v, _)| aff.coeff(*v) != 0)
        .map(|(v, (_, extent))| RadixTerm { var: v, coeff: aff.coeff(v), extent: *extent })
        .collect();
    terms.sort_by_key(|t| t.coeff);
    let mut expected: i64 = 1;
    for t in &terms {
        if t.coeff != expected {
            return Err(format!(
                "index `{}` is not injective: coefficient {} of `{}`, expected {}",
                index, t.coeff, vars[t.var].0, expected
            ));
        }
        expected = expected
            .checked_mul(t.extent)
            .ok_or_else(|| format!("index `{}` overflows a 64-bit integer", index))?;
    }
    Ok(FusedSum { terms, span: expected })
}

/// Digit decomposition of every index dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BijectiveMap {
    pub sums: Vec<FusedSum>,
    pub dims: Vec<Digit>,
}

impl BijectiveMap {
    /// Check that `indices` map the domain `vars` (name, extent) one-to-one
    /// onto some box, and find that box. The error explains the first
    /// violation.
    pub fn detect(indices: &[Expr], vars: &[(String, i64)]) -> Result<Self, String> {
        let names: Vec<String> = vars.iter().map(|(n, _)| n.clone()).collect();
        let mut sums: Vec<FusedSum> = Vec::new();
        let mut keys: Vec<Vec<i64>> = Vec::new();
        let mut first_dim: Vec<usize> = Vec::new();
        let mut owner: Vec<Option<usize>> = vec![None; vars.len()];
        let mut dims = Vec::with_capacity(indices.len());
        for (d, index) in indices.iter().enumerate() {
            let (mut aff, lower, modulus) = split_index(&index.simplify(), &names)
                .ok_or_else(|| format!("index `{}` is not affine", index))?;
            for (v, (_, extent)) in vars.iter().enumerate() {
                if *extent == 1 && v < aff.coeffs.len() {
                    aff.coeffs[v] = 0;
                }
            }
            if aff.constant != 0 {
                return Err(format!("index `{}` is offset by {}", index, aff.constant));
            }
            if aff.is_constant() {
                dims.push(Digit { sum: None, lower: 1, extent: 1 });
                continue;
            }
            let sum = match keys.iter().position(|k| *k == aff.coeffs) {
                Some(s) => s,
                None => {
                    let fused = radix_terms(&aff, vars, index)?;
                    let s = sums.len();
                    for t in &fused.terms {
                        if let Some(other) = owner[t.var] {
                            return Err(format!(
                                "`{}` appears in dimensions {} and {}",
                                names[t.var], first_dim[other], d
                            ));
                        }
                        owner[t.var] = Some(s);
                    }
                    sums.push(fused);
                    keys.push(aff.coeffs.clone());
                    first_dim.push(d);
                    s
                }
            };
            let span = sums[sum].span;
            let whole = if span % lower == 0 { Some(span / lower) } else { None };
            let extent = match (modulus, whole) {
                // the modulus never wraps
                (Some(m), Some(w)) if w <= m => w,
                (Some(m), _) => m,
                (None, Some(w)) => w,
                (None, None) => {
                    return Err(format!("index `{}` does not divide the {} values of its sum", index, span))
                }
            };
            dims.push(Digit { sum: Some(sum), lower, extent });
        }

        for (s, fused) in sums.iter().enumerate() {
            let mut digits: Vec<(usize, &Digit)> =
                dims.iter().enumerate().filter(|(_, g)| g.sum == Some(s)).collect();
            digits.sort_by_key(|(_, g)| g.lower);
            let mut expected: i64 = 1;
            for (d, g) in &digits {
                if g.lower != expected {
                    return Err(format!(
                        "index `{}` is not injective: digit starts at {}, expected {}",
                        indices[*d], g.lower, expected
                    ));
                }
                expected = expected
                    .checked_mul(g.extent)
                    .ok_or_else(|| format!("index `{}` overflows a 64-bit integer", indices[*d]))?;
            }
            if expected != fused.span {
                return Err(format!(
                    "index `{}` covers {} of the {} values of its sum",
                    indices[first_dim[s]], expected, fused.span
                ));
            }
        }
        if let Some(v) = (0..vars.len()).find(|&v| vars[v].1 != 1 && owner[v].is_none()) {
            return Err(format!("`{}` does not appear in any index", names[v]));
        }
        Ok(Self { sums, dims })
    }

    /// Like [`BijectiveMap::detect`], and the box must be `shape`.
    pub fn analyze(indices: &[Expr], vars: &[(String, i64)], shape: &[i64]) -> Result<Self, String> {
        if indices.len() != shape.len() {
            return Err(format!("{} indices for a {}-d domain", indices.len(), shape.len()));
        }
        let map = Self::detect(indices, vars)?;
        for ((index, digit), &extent) in indices.iter().zip(&map.dims).zip(shape) {
            if digit.extent != extent {
                return Err(format!("index `{}` covers [0, {}) instead of [0, {})", index, digit.extent, extent));
            }
        }
        Ok(map)
    }

    /// Extent of every index dimension.
    pub fn extents(&self) -> Vec<i64> {
        self.dims.iter().map(|g| g.extent).collect()
    }

    /// Express every domain variable through the image coordinates `image`.
    /// Unit-extent variables become 0.
    pub fn inverse(&self, image: &[Expr], n_var: usize) -> Vec<Expr> {
        let mut out = vec![Expr::Int(0); n_var];
        for (s, fused) in self.sums.iter().enumerate() {
            let mut digits: Vec<(&Digit, &Expr)> =
                self.dims.iter().zip(image).filter(|(g, _)| g.sum == Some(s)).collect();
            digits.sort_by_key(|(g, _)| Reverse(g.lower));
            // Horner from the outermost digit
            let mut value: Option<Expr> = None;
            for (g, p) in digits {
                value = Some(match value {
                    None => p.clone(),
                    Some(outer) => outer * g.extent + p.clone(),
                });
            }
            let value = match value {
                Some(value) => value,
                None => continue,
            };
            for (k, t) in fused.terms.iter().enumerate() {
                let mut e = value.clone().floordiv(t.coeff);
                if k + 1 < fused.terms.len() {
                    e = e.floormod(t.extent);
                }
                out[t.var] = e.simplify();
            }
        }
        out
    }
}
