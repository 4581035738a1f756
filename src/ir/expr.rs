//! Scalar and index expressions of the tensor IR.
//!
//! Expressions are plain trees. Variables and buffers are referred to by name;
//! names are unique inside one function, so structural equality of two
//! expressions is simply `PartialEq`.

use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Sub, Mul};

/// Integer floor division (rounds toward negative infinity).
fn floor_div_i64(a: i64, b: i64) -> i64 {
    let d = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    FloorMod,
    Min,
    Max,
    Lt,
}

impl BinaryOp {
    /// Surface symbol used by the printer.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::FloorDiv => "//",
            BinaryOp::FloorMod => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Lt => "<",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Lt => 1,
            BinaryOp::Add | BinaryOp::Sub => 2,
            BinaryOp::Mul | BinaryOp::FloorDiv | BinaryOp::FloorMod => 3,
            BinaryOp::Min | BinaryOp::Max => 4,
        }
    }

    fn is_call_like(&self) -> bool {
        matches!(self, BinaryOp::Min | BinaryOp::Max)
    }

    /// Fold two integer constants. `None` on division by zero or overflow;
    /// the node is then left unfolded.
    pub fn fold(&self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::FloorDiv | BinaryOp::FloorMod if b == 0 || (a == i64::MIN && b == -1) => None,
            BinaryOp::FloorDiv => Some(floor_div_i64(a, b)),
            BinaryOp::FloorMod => Some(a - floor_div_i64(a, b) * b),
            BinaryOp::Min => Some(a.min(b)),
            BinaryOp::Max => Some(a.max(b)),
            BinaryOp::Lt => Some((a < b) as i64),
        }
    }
}

/// Access mode of an opaque pointer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
            AccessMode::ReadWrite => "rw",
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer constant
    Int(i64),
    /// Floating point constant
    Float(f64),
    /// Loop or block iteration variable
    Var(String),
    /// Element load `buffer[indices]`
    Load {
        buffer: String,
        indices: Vec<Expr>,
    },
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Intrinsic call such as `exp`
    Call {
        func: String,
        args: Vec<Expr>,
    },
    /// Opaque pointer to the whole buffer; defeats element-wise analysis
    AccessPtr {
        buffer: String,
        mode: AccessMode,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn float(value: f64) -> Self {
        Expr::Float(value)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn load(buffer: impl Into<String>, indices: Vec<Expr>) -> Self {
        Expr::Load { buffer: buffer.into(), indices }
    }

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call { func: func.into(), args }
    }

    pub fn access_ptr(buffer: impl Into<String>, mode: AccessMode) -> Self {
        Expr::AccessPtr { buffer: buffer.into(), mode }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn floordiv(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::FloorDiv, self, rhs.into())
    }

    pub fn floormod(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::FloorMod, self, rhs.into())
    }

    pub fn min(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Min, self, rhs.into())
    }

    pub fn max(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Max, self, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Lt, self, rhs.into())
    }

    /// Name of the variable if this is a bare variable.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Value of the constant if this is an integer literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Visit every sub-expression in pre-order.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) | Expr::AccessPtr { .. } => {}
            Expr::Load { indices, .. } => indices.iter().for_each(|e| e.visit(f)),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.visit(f)),
        }
    }

    /// Rebuild the expression bottom-up. Whenever `f` returns `Some`, that node
    /// is replaced wholesale and its children are not visited.
    pub fn rewrite(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) | Expr::AccessPtr { .. } => self.clone(),
            Expr::Load { buffer, indices } => Expr::Load {
                buffer: buffer.clone(),
                indices: indices.iter().map(|e| e.rewrite(f)).collect(),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.rewrite(f)),
                rhs: Box::new(rhs.rewrite(f)),
            },
            Expr::Call { func, args } => Expr::Call {
                func: func.clone(),
                args: args.iter().map(|e| e.rewrite(f)).collect(),
            },
        }
    }

    /// Replace variables according to `map`.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        self.rewrite(&mut |e| match e {
            Expr::Var(name) => map.get(name).cloned(),
            _ => None,
        })
    }

    /// Replace every load of `buffer` by `f(indices)`.
    pub fn replace_loads(&self, buffer: &str, f: &mut impl FnMut(&[Expr]) -> Expr) -> Expr {
        self.rewrite(&mut |e| match e {
            Expr::Load { buffer: b, indices } if b == buffer => {
                // indices may themselves load the same buffer
                let inner: Vec<Expr> = indices.iter().map(|i| i.replace_loads(buffer, f)).collect();
                Some(f(&inner))
            }
            _ => None,
        })
    }

    /// Index lists of every load of `buffer`, in visiting order.
    pub fn loads_of(&self, buffer: &str) -> Vec<Vec<Expr>> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Load { buffer: b, indices } = e {
                if b == buffer {
                    out.push(indices.clone());
                }
            }
        });
        out
    }

    /// Whether the expression touches `buffer` at all.
    pub fn uses_buffer(&self, buffer: &str) -> bool {
        let mut found = false;
        self.visit(&mut |e| match e {
            Expr::Load { buffer: b, .. } | Expr::AccessPtr { buffer: b, .. } if b == buffer => {
                found = true
            }
            _ => {}
        });
        found
    }

    /// Whether the expression takes an opaque pointer to `buffer`.
    pub fn has_access_ptr(&self, buffer: &str) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let Expr::AccessPtr { buffer: b, .. } = e {
                if b == buffer {
                    found = true;
                }
            }
        });
        found
    }

    /// Whether the variable `name` occurs in the expression.
    pub fn uses_var(&self, name: &str) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let Expr::Var(v) = e {
                if v == name {
                    found = true;
                }
            }
        });
        found
    }

    /// Integer constant folding plus the usual identities
    /// (`x + 0`, `x * 1`, `x * 0`, `x // 1`, `x % 1`).
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.simplify();
                let rhs = rhs.simplify();
                if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
                    if let Some(v) = op.fold(a, b) {
                        return Expr::Int(v);
                    }
                }
                match (op, lhs.as_int(), rhs.as_int()) {
                    (BinaryOp::Add, Some(0), _) => rhs,
                    (BinaryOp::Add, _, Some(0)) | (BinaryOp::Sub, _, Some(0)) => lhs,
                    (BinaryOp::Mul, Some(1), _) => rhs,
                    (BinaryOp::Mul, _, Some(1)) | (BinaryOp::FloorDiv, _, Some(1)) => lhs,
                    (BinaryOp::Mul, Some(0), _) | (BinaryOp::Mul, _, Some(0)) => Expr::Int(0),
                    (BinaryOp::FloorMod, _, Some(1)) => Expr::Int(0),
                    (BinaryOp::FloorDiv, Some(0), _) | (BinaryOp::FloorMod, Some(0), _) => {
                        Expr::Int(0)
                    }
                    _ => Expr::binary(*op, lhs, rhs),
                }
            }
            Expr::Load { buffer, indices } => Expr::Load {
                buffer: buffer.clone(),
                indices: indices.iter().map(Expr::simplify).collect(),
            },
            Expr::Call { func, args } => Expr::Call {
                func: func.clone(),
                args: args.iter().map(Expr::simplify).collect(),
            },
            _ => self.clone(),
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{}", v),
            Expr::Float(v) => write!(f, "{:?}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Load { buffer, indices } => {
                write!(f, "{}[", buffer)?;
                for (i, idx) in indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    idx.fmt_prec(f, 0)?;
                }
                write!(f, "]")
            }
            Expr::Binary { op, lhs, rhs } if op.is_call_like() => {
                write!(f, "{}(", op.symbol())?;
                lhs.fmt_prec(f, 0)?;
                write!(f, ", ")?;
                rhs.fmt_prec(f, 0)?;
                write!(f, ")")
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let needs_parens = prec < parent;
                if needs_parens {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                // right operand binds tighter so that a - (b - c) keeps its parens
                rhs.fmt_prec(f, prec + 1)?;
                if needs_parens {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    arg.fmt_prec(f, 0)?;
                }
                write!(f, ")")
            }
            Expr::AccessPtr { buffer, mode } => {
                write!(f, "{}.access_ptr(\"{}\")", buffer, mode.as_str())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Int(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Float(value)
    }
}

impl<T: Into<Expr>> Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs.into())
    }
}

impl<T: Into<Expr>> Sub<T> for Expr {
    type Output = Expr;

    fn sub(self, rhs: T) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs.into())
    }
}

impl<T: Into<Expr>> Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs.into())
    }
}
