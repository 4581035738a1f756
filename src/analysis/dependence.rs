//! Producer/consumer relations between blocks of one scope.
//!
//! A scope is the set of blocks whose nearest enclosing block is the same
//! (for most functions: every block directly under the root). Relations are
//! derived from the declared read and write regions.

use crate::ir::expr::Expr;
use crate::schedule::state::{Handle, Item, ScheduleState, ScopeNode};
use crate::utils::errors::ScheduleResult;
use std::collections::HashMap;

/// Writers and readers of every buffer inside one block scope.
#[derive(Debug, Clone, Default)]
pub struct BlockScope {
    /// Blocks of the scope in program order
    pub blocks: Vec<Handle>,
    writers: HashMap<String, Vec<Handle>>,
    readers: HashMap<String, Vec<Handle>>,
}

fn push_unique(list: &mut Vec<Handle>, h: Handle) {
    if !list.contains(&h) {
        list.push(h);
    }
}

impl BlockScope {
    /// Collect the blocks directly inside `scope`.
    pub fn new(state: &ScheduleState, scope: Handle) -> ScheduleResult<Self> {
        let mut out = BlockScope { blocks: state.child_blocks(scope)?, ..Default::default() };
        for &h in &out.blocks {
            let block = state.block(h)?;
            for region in &block.writes {
                push_unique(out.writers.entry(region.buffer.clone()).or_default(), h);
            }
            for region in &block.reads {
                push_unique(out.readers.entry(region.buffer.clone()).or_default(), h);
            }
        }
        Ok(out)
    }

    /// Scope enclosing `block`.
    pub fn of_block(state: &ScheduleState, block: Handle) -> ScheduleResult<Self> {
        match state.enclosing_block(block)? {
            Some(scope) => Self::new(state, scope),
            None => Ok(Self::default()),
        }
    }

    pub fn writers(&self, buffer: &str) -> &[Handle] {
        self.writers.get(buffer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn readers(&self, buffer: &str) -> &[Handle] {
        self.readers.get(buffer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks other than `block` reading what `block` writes.
    pub fn consumers(&self, state: &ScheduleState, block: Handle) -> ScheduleResult<Vec<Handle>> {
        let mut out = Vec::new();
        for region in &state.block(block)?.writes {
            for &h in self.readers(&region.buffer) {
                if h != block {
                    push_unique(&mut out, h);
                }
            }
        }
        Ok(out)
    }

    /// Blocks other than `block` writing what `block` reads.
    pub fn producers(&self, state: &ScheduleState, block: Handle) -> ScheduleResult<Vec<Handle>> {
        let mut out = Vec::new();
        for region in &state.block(block)?.reads {
            for &h in self.writers(&region.buffer) {
                if h != block {
                    push_unique(&mut out, h);
                }
            }
        }
        Ok(out)
    }
}

/// Visit every expression of the subtree at `handle`: block bindings,
/// predicates, inits, leaf statements and region bounds.
pub fn visit_subtree_exprs(
    state: &ScheduleState,
    handle: Handle,
    f: &mut impl FnMut(&Expr),
) -> ScheduleResult<()> {
    let node = state.get(handle)?;
    if let ScopeNode::Block(b) = node {
        for iv in &b.iter_vars {
            iv.binding.visit(f);
        }
        if let Some(p) = &b.predicate {
            p.visit(f);
        }
        if let Some(init) = &b.init {
            init.visit_exprs(f);
        }
        for region in b.reads.iter().chain(&b.writes) {
            region.visit_exprs(f);
        }
        for m in &b.match_buffers {
            m.source.visit_exprs(f);
        }
    }
    for item in node.body() {
        match item {
            Item::Stmt(s) => s.visit_exprs(f),
            Item::Scope(h) => visit_subtree_exprs(state, *h, f)?,
        }
    }
    Ok(())
}

/// Whether anything in the function takes an opaque pointer to `buffer`.
pub fn has_opaque_access(state: &ScheduleState, buffer: &str) -> ScheduleResult<bool> {
    let mut found = false;
    visit_subtree_exprs(state, state.root(), &mut |e| {
        if let Expr::AccessPtr { buffer: b, .. } = e {
            if b == buffer {
                found = true;
            }
        }
    })?;
    Ok(found)
}

/// Name of a block declaring a sub-view of `buffer`, if any.
pub fn aliasing_block(state: &ScheduleState, buffer: &str) -> ScheduleResult<Option<String>> {
    for h in state.blocks_post_order() {
        let block = state.block(h)?;
        if block.match_buffers.iter().any(|m| m.source.buffer == buffer) {
            return Ok(Some(block.name.clone()));
        }
    }
    Ok(None)
}

/// Whether anything in the function still mentions `buffer`, declarations
/// aside.
pub fn is_referenced(state: &ScheduleState, buffer: &str) -> ScheduleResult<bool> {
    let mut found = false;
    visit_subtree_exprs(state, state.root(), &mut |e| found |= e.uses_buffer(buffer))?;
    for h in state.reachable() {
        let node = state.get(h)?;
        if let ScopeNode::Block(b) = node {
            found |= b
                .reads
                .iter()
                .chain(&b.writes)
                .chain(b.match_buffers.iter().map(|m| &m.source))
                .any(|r| r.buffer == buffer);
            if let Some(init) = &b.init {
                init.visit_stores(&mut |name, _| found |= name == buffer);
            }
        }
        for item in node.body() {
            if let Item::Stmt(s) = item {
                s.visit_stores(&mut |name, _| found |= name == buffer);
            }
        }
    }
    Ok(found)
}
