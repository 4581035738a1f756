//! Statements, blocks, buffers and functions.
//!
//! This is the tree form of the IR: what callers construct and what a
//! [`Schedule`](crate::schedule::Schedule) hands back. Schedules work on an
//! arena copy of it (see [`crate::schedule::state`]).

use crate::ir::expr::Expr;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Element type of buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float16,
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int8 => "int8",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
        };
        write!(f, "{}", s)
    }
}

/// Where a buffer lives relative to the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferScope {
    /// Function parameter, visible to the caller
    Boundary,
    /// Allocated inside the function
    Internal,
}

/// A multi-dimensional buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: DataType,
    pub scope: BufferScope,
}

impl Buffer {
    /// A function parameter buffer.
    pub fn param(name: impl Into<String>, shape: &[i64], dtype: DataType) -> Self {
        Self { name: name.into(), shape: shape.to_vec(), dtype, scope: BufferScope::Boundary }
    }

    /// An internal allocation.
    pub fn alloc(name: impl Into<String>, shape: &[i64], dtype: DataType) -> Self {
        Self { name: name.into(), shape: shape.to_vec(), dtype, scope: BufferScope::Internal }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

/// Half-open range `[min, min + extent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

impl Range {
    pub fn new(min: Expr, extent: Expr) -> Self {
        Self { min, extent }
    }

    /// A single point.
    pub fn point(index: Expr) -> Self {
        Self { min: index, extent: Expr::Int(1) }
    }

    /// `[0, extent)`.
    pub fn from_extent(extent: i64) -> Self {
        Self { min: Expr::Int(0), extent: Expr::Int(extent) }
    }
}

/// A rectangular region of a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferRegion {
    pub buffer: String,
    pub region: Vec<Range>,
}

impl BufferRegion {
    pub fn new(buffer: impl Into<String>, region: Vec<Range>) -> Self {
        Self { buffer: buffer.into(), region }
    }

    /// The region made of one element.
    pub fn point(buffer: impl Into<String>, indices: &[Expr]) -> Self {
        Self {
            buffer: buffer.into(),
            region: indices.iter().cloned().map(Range::point).collect(),
        }
    }

    /// The whole buffer.
    pub fn full(buffer: &Buffer) -> Self {
        Self {
            buffer: buffer.name.clone(),
            region: buffer.shape.iter().map(|&e| Range::from_extent(e)).collect(),
        }
    }

    /// Apply a variable substitution to every bound of the region.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Self {
        Self {
            buffer: self.buffer.clone(),
            region: self
                .region
                .iter()
                .map(|r| Range::new(r.min.substitute(map).simplify(), r.extent.substitute(map).simplify()))
                .collect(),
        }
    }

    /// Visit every bound expression.
    pub fn visit_exprs(&self, f: &mut impl FnMut(&Expr)) {
        for r in &self.region {
            r.min.visit(f);
            r.extent.visit(f);
        }
    }
}

impl fmt::Display for BufferRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.buffer)?;
        for (i, r) in self.region.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match r.extent.as_int() {
                Some(1) => write!(f, "{}", r.min)?,
                _ => write!(f, "{}:{}", r.min, (r.min.clone() + r.extent.clone()).simplify())?,
            }
        }
        write!(f, "]")
    }
}

/// A sub-view of another buffer declared inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchBuffer {
    pub buffer: Buffer,
    pub source: BufferRegion,
}

/// Kind of a block iteration variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterKind {
    Spatial,
    Reduce,
}

/// A block iteration variable together with its binding to outer loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterVar {
    pub var: String,
    pub extent: i64,
    pub kind: IterKind,
    /// Value of the variable in terms of the enclosing loop variables
    pub binding: Expr,
}

impl IterVar {
    pub fn spatial(var: impl Into<String>, extent: i64, binding: Expr) -> Self {
        Self { var: var.into(), extent, kind: IterKind::Spatial, binding }
    }

    pub fn reduce(var: impl Into<String>, extent: i64, binding: Expr) -> Self {
        Self { var: var.into(), extent, kind: IterKind::Reduce, binding }
    }
}

/// A named computation unit with declared access regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub iter_vars: Vec<IterVar>,
    pub reads: Vec<BufferRegion>,
    pub writes: Vec<BufferRegion>,
    /// Execution predicate (`where` clause)
    pub predicate: Option<Expr>,
    /// Reduction initialisation
    pub init: Option<Box<Stmt>>,
    pub alloc_buffers: Vec<Buffer>,
    pub match_buffers: Vec<MatchBuffer>,
    pub annotations: BTreeMap<String, String>,
    pub body: Box<Stmt>,
}

/// A serial loop `for var in range(extent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub var: String,
    pub extent: i64,
    pub body: Box<Stmt>,
}

/// A statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Seq(Vec<Stmt>),
    For(Loop),
    Block(Block),
    Store {
        buffer: String,
        indices: Vec<Expr>,
        value: Expr,
    },
    Evaluate(Expr),
}

impl Stmt {
    /// Build a sequence, flattening nested sequences and collapsing singletons.
    pub fn seq(stmts: Vec<Stmt>) -> Stmt {
        let mut flat = Vec::with_capacity(stmts.len());
        for s in stmts {
            match s {
                Stmt::Seq(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Stmt::Seq(Vec::new()))
        } else {
            Stmt::Seq(flat)
        }
    }

    pub fn store(buffer: impl Into<String>, indices: Vec<Expr>, value: Expr) -> Stmt {
        Stmt::Store { buffer: buffer.into(), indices, value }
    }

    /// Visit every expression reachable from this statement, nested blocks included.
    pub fn visit_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Stmt::Seq(stmts) => stmts.iter().for_each(|s| s.visit_exprs(f)),
            Stmt::For(l) => l.body.visit_exprs(f),
            Stmt::Block(b) => b.visit_exprs(f),
            Stmt::Store { indices, value, .. } => {
                indices.iter().for_each(|e| e.visit(f));
                value.visit(f);
            }
            Stmt::Evaluate(e) => e.visit(f),
        }
    }

    /// Rebuild the statement with `f` applied to each of its expressions.
    /// Nested blocks get their bindings, predicate, init and body mapped;
    /// region bounds are left alone.
    pub fn map_exprs(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Stmt {
        match self {
            Stmt::Seq(stmts) => Stmt::Seq(stmts.iter().map(|s| s.map_exprs(f)).collect()),
            Stmt::For(l) => Stmt::For(Loop {
                var: l.var.clone(),
                extent: l.extent,
                body: Box::new(l.body.map_exprs(f)),
            }),
            Stmt::Block(b) => {
                let mut block = b.clone();
                for iv in &mut block.iter_vars {
                    iv.binding = f(&iv.binding);
                }
                block.predicate = b.predicate.as_ref().map(|p| f(p));
                block.init = b.init.as_ref().map(|s| Box::new(s.map_exprs(f)));
                block.body = Box::new(b.body.map_exprs(f));
                Stmt::Block(block)
            }
            Stmt::Store { buffer, indices, value } => Stmt::Store {
                buffer: buffer.clone(),
                indices: indices.iter().map(|e| f(e)).collect(),
                value: f(value),
            },
            Stmt::Evaluate(e) => Stmt::Evaluate(f(e)),
        }
    }

    /// Visit every store reachable from this statement as `(buffer, indices)`.
    pub fn visit_stores(&self, f: &mut impl FnMut(&str, &[Expr])) {
        match self {
            Stmt::Seq(stmts) => stmts.iter().for_each(|s| s.visit_stores(f)),
            Stmt::For(l) => l.body.visit_stores(f),
            Stmt::Block(b) => {
                if let Some(init) = &b.init {
                    init.visit_stores(f);
                }
                b.body.visit_stores(f);
            }
            Stmt::Store { buffer, indices, .. } => f(buffer, indices),
            Stmt::Evaluate(_) => {}
        }
    }

    /// Visit every block in post order (children before parents).
    pub fn visit_blocks(&self, f: &mut impl FnMut(&Block)) {
        match self {
            Stmt::Seq(stmts) => stmts.iter().for_each(|s| s.visit_blocks(f)),
            Stmt::For(l) => l.body.visit_blocks(f),
            Stmt::Block(b) => {
                b.body.visit_blocks(f);
                f(b);
            }
            Stmt::Store { .. } | Stmt::Evaluate(_) => {}
        }
    }
}

impl Block {
    /// Visit the predicate, init, body and region bounds of this block.
    pub fn visit_exprs(&self, f: &mut impl FnMut(&Expr)) {
        for iv in &self.iter_vars {
            iv.binding.visit(f);
        }
        if let Some(p) = &self.predicate {
            p.visit(f);
        }
        if let Some(init) = &self.init {
            init.visit_exprs(f);
        }
        self.body.visit_exprs(f);
    }
}

/// A function: parameter buffers plus a synthetic root block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Buffer>,
    pub root: Block,
}

impl Function {
    /// Look up a buffer by name among the parameters and every allocation.
    pub fn buffer(&self, name: &str) -> Option<&Buffer> {
        self.params
            .iter()
            .find(|b| b.name == name)
            .or_else(|| self.find_alloc(name))
    }

    fn find_alloc(&self, name: &str) -> Option<&Buffer> {
        fn walk<'a>(stmt: &'a Stmt, name: &str) -> Option<&'a Buffer> {
            match stmt {
                Stmt::Seq(stmts) => stmts.iter().find_map(|s| walk(s, name)),
                Stmt::For(l) => walk(&l.body, name),
                Stmt::Block(b) => b
                    .alloc_buffers
                    .iter()
                    .find(|buf| buf.name == name)
                    .or_else(|| walk(&b.body, name)),
                _ => None,
            }
        }
        self.root
            .alloc_buffers
            .iter()
            .find(|b| b.name == name)
            .or_else(|| walk(&self.root.body, name))
    }

    /// Names of all blocks, root included, in post order.
    pub fn block_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.root.body.visit_blocks(&mut |b| names.push(b.name.clone()));
        names.push(self.root.name.clone());
        names
    }
}

/// A program: function name to function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: BTreeMap<String, Function>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, func: Function) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}
