//! Builders for constructing functions and blocks.
//!
//! Read and write regions are detected from the block body unless they are
//! given explicitly. Opaque pointer accesses are never detected; blocks that
//! use them should declare their regions.

use crate::ir::expr::Expr;
use crate::ir::stmt::{Block, Buffer, BufferRegion, Function, IterVar, Loop, MatchBuffer, Stmt};
use std::collections::BTreeMap;

/// Name of the synthetic block wrapping a function body.
pub const ROOT_BLOCK_NAME: &str = "root";

fn push_unique(regions: &mut Vec<BufferRegion>, region: BufferRegion) {
    if !regions.contains(&region) {
        regions.push(region);
    }
}

/// Detect `(reads, writes)` of a block from its predicate, init and body.
pub fn detect_regions(
    body: &Stmt,
    init: Option<&Stmt>,
    predicate: Option<&Expr>,
) -> (Vec<BufferRegion>, Vec<BufferRegion>) {
    let mut reads = Vec::new();
    let mut writes = Vec::new();
    if let Some(p) = predicate {
        p.visit(&mut |e| {
            if let Expr::Load { buffer, indices } = e {
                push_unique(&mut reads, BufferRegion::point(buffer.clone(), indices));
            }
        });
    }
    for stmt in init.into_iter().chain(std::iter::once(body)) {
        stmt.visit_exprs(&mut |e| {
            if let Expr::Load { buffer, indices } = e {
                push_unique(&mut reads, BufferRegion::point(buffer.clone(), indices));
            }
        });
        stmt.visit_stores(&mut |buffer, indices| {
            push_unique(&mut writes, BufferRegion::point(buffer, indices));
        });
    }
    (reads, writes)
}

/// Builder for [`Block`].
#[derive(Debug)]
pub struct BlockBuilder {
    name: String,
    iter_vars: Vec<IterVar>,
    reads: Option<Vec<BufferRegion>>,
    writes: Option<Vec<BufferRegion>>,
    predicate: Option<Expr>,
    init: Option<Stmt>,
    alloc_buffers: Vec<Buffer>,
    match_buffers: Vec<MatchBuffer>,
    annotations: BTreeMap<String, String>,
    body: Vec<Stmt>,
}

impl BlockBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iter_vars: Vec::new(),
            reads: None,
            writes: None,
            predicate: None,
            init: None,
            alloc_buffers: Vec::new(),
            match_buffers: Vec::new(),
            annotations: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Add a spatial iteration variable bound to `binding`.
    pub fn spatial(mut self, var: impl Into<String>, extent: i64, binding: Expr) -> Self {
        self.iter_vars.push(IterVar::spatial(var, extent, binding));
        self
    }

    /// Add a reduction iteration variable bound to `binding`.
    pub fn reduce(mut self, var: impl Into<String>, extent: i64, binding: Expr) -> Self {
        self.iter_vars.push(IterVar::reduce(var, extent, binding));
        self
    }

    /// Declare read regions instead of detecting them.
    pub fn reads(mut self, regions: Vec<BufferRegion>) -> Self {
        self.reads = Some(regions);
        self
    }

    /// Declare write regions instead of detecting them.
    pub fn writes(mut self, regions: Vec<BufferRegion>) -> Self {
        self.writes = Some(regions);
        self
    }

    pub fn predicate(mut self, predicate: Expr) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn init(mut self, init: Stmt) -> Self {
        self.init = Some(init);
        self
    }

    pub fn alloc(mut self, buffer: Buffer) -> Self {
        self.alloc_buffers.push(buffer);
        self
    }

    pub fn match_buffer(mut self, buffer: Buffer, source: BufferRegion) -> Self {
        self.match_buffers.push(MatchBuffer { buffer, source });
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn store(mut self, buffer: impl Into<String>, indices: Vec<Expr>, value: Expr) -> Self {
        self.body.push(Stmt::store(buffer, indices, value));
        self
    }

    pub fn evaluate(mut self, expr: Expr) -> Self {
        self.body.push(Stmt::Evaluate(expr));
        self
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.body.push(stmt);
        self
    }

    pub fn build(self) -> Block {
        let body = Stmt::seq(self.body);
        let (reads, writes) = match (self.reads, self.writes) {
            (Some(r), Some(w)) => (r, w),
            (r, w) => {
                let (dr, dw) = detect_regions(&body, self.init.as_ref(), self.predicate.as_ref());
                (r.unwrap_or(dr), w.unwrap_or(dw))
            }
        };
        Block {
            name: self.name,
            iter_vars: self.iter_vars,
            reads,
            writes,
            predicate: self.predicate,
            init: self.init.map(Box::new),
            alloc_buffers: self.alloc_buffers,
            match_buffers: self.match_buffers,
            annotations: self.annotations,
            body: Box::new(body),
        }
    }

    /// Build and wrap into a statement.
    pub fn into_stmt(self) -> Stmt {
        Stmt::Block(self.build())
    }
}

/// Nest `body` under serial loops, outermost first.
pub fn grid(loops: &[(&str, i64)], body: Stmt) -> Stmt {
    loops.iter().rev().fold(body, |inner, &(var, extent)| {
        Stmt::For(Loop { var: var.to_string(), extent, body: Box::new(inner) })
    })
}

/// Builder for [`Function`].
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    params: Vec<Buffer>,
    allocs: Vec<Buffer>,
    annotations: BTreeMap<String, String>,
    body: Vec<Stmt>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            allocs: Vec::new(),
            annotations: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn param(mut self, buffer: Buffer) -> Self {
        self.params.push(buffer);
        self
    }

    /// Allocate a buffer in the root block.
    pub fn alloc(mut self, buffer: Buffer) -> Self {
        self.allocs.push(buffer);
        self
    }

    /// Annotate the root block.
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.body.push(stmt);
        self
    }

    pub fn build(self) -> Function {
        Function {
            name: self.name,
            params: self.params,
            root: Block {
                name: ROOT_BLOCK_NAME.to_string(),
                iter_vars: Vec::new(),
                reads: Vec::new(),
                writes: Vec::new(),
                predicate: None,
                init: None,
                alloc_buffers: self.allocs,
                match_buffers: Vec::new(),
                annotations: self.annotations,
                body: Box::new(Stmt::seq(self.body)),
            },
        }
    }
}
