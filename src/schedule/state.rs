//! Arena snapshot of a function and its location index.
//!
//! Every block and loop of the scheduled function lives in one slot of an
//! arena and is addressed by a [`Handle`] made of the slot index and the
//! slot's generation. Removing a node bumps the generation of its slot, so
//! handles to removed nodes fail with `StaleHandle` instead of reaching
//! whatever reuses the slot later.
//!
//! Leaf statements (stores and evaluations) are stored inline in the body of
//! their scope; only scopes get handles.

use crate::ir::expr::Expr;
use crate::ir::stmt::{Block, Buffer, BufferRegion, Function, IterVar, Loop, MatchBuffer, Stmt};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;

/// Generation-tagged reference to a block or loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// One element of a scope body.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A nested block or loop
    Scope(Handle),
    /// A store or evaluation
    Stmt(Stmt),
}

/// Block stored in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub name: String,
    pub iter_vars: Vec<IterVar>,
    pub reads: Vec<BufferRegion>,
    pub writes: Vec<BufferRegion>,
    pub predicate: Option<Expr>,
    pub init: Option<Stmt>,
    pub alloc_buffers: Vec<Buffer>,
    pub match_buffers: Vec<MatchBuffer>,
    pub annotations: BTreeMap<String, String>,
    pub body: Vec<Item>,
}

impl BlockNode {
    /// The only statement of the body if it is a single store.
    pub fn single_store(&self) -> Option<(&str, &[Expr], &Expr)> {
        match self.body.as_slice() {
            [Item::Stmt(Stmt::Store { buffer, indices, value })] => {
                Some((buffer.as_str(), indices.as_slice(), value))
            }
            _ => None,
        }
    }

    /// `(var, extent)` of every iteration variable.
    pub fn domain(&self) -> Vec<(String, i64)> {
        self.iter_vars.iter().map(|iv| (iv.var.clone(), iv.extent)).collect()
    }
}

/// Loop stored in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopNode {
    pub var: String,
    pub extent: i64,
    pub body: Vec<Item>,
}

/// A scope: block or loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeNode {
    Block(BlockNode),
    Loop(LoopNode),
}

impl ScopeNode {
    pub fn body(&self) -> &Vec<Item> {
        match self {
            ScopeNode::Block(b) => &b.body,
            ScopeNode::Loop(l) => &l.body,
        }
    }

    pub fn body_mut(&mut self) -> &mut Vec<Item> {
        match self {
            ScopeNode::Block(b) => &mut b.body,
            ScopeNode::Loop(l) => &mut l.body,
        }
    }

    /// Child scopes directly nested in the body.
    pub fn children(&self) -> impl Iterator<Item = Handle> + '_ {
        self.body().iter().filter_map(|item| match item {
            Item::Scope(h) => Some(*h),
            Item::Stmt(_) => None,
        })
    }

    fn describe(&self) -> String {
        match self {
            ScopeNode::Block(b) => format!("block \"{}\"", b.name),
            ScopeNode::Loop(l) => format!("loop \"{}\"", l.var),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    node: ScopeNode,
    parent: Option<Handle>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Mutable snapshot of one function.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    func_name: String,
    params: Vec<Buffer>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: Handle,
}

fn stale(handle: Handle) -> ScheduleError {
    ScheduleError::new(
        ScheduleErrorKind::StaleHandle,
        "locate",
        format!("handle {} does not refer to a live block or loop", handle),
    )
}

impl ScheduleState {
    /// Index a copy of `func`.
    pub fn new(func: &Function) -> Self {
        let mut state = Self {
            func_name: func.name.clone(),
            params: func.params.clone(),
            slots: Vec::new(),
            free: Vec::new(),
            root: Handle { index: 0, generation: 0 },
        };
        state.root = state.index_block(&func.root, None);
        state
    }

    fn index_block(&mut self, block: &Block, parent: Option<Handle>) -> Handle {
        let node = BlockNode {
            name: block.name.clone(),
            iter_vars: block.iter_vars.clone(),
            reads: block.reads.clone(),
            writes: block.writes.clone(),
            predicate: block.predicate.clone(),
            init: block.init.as_deref().cloned(),
            alloc_buffers: block.alloc_buffers.clone(),
            match_buffers: block.match_buffers.clone(),
            annotations: block.annotations.clone(),
            body: Vec::new(),
        };
        let handle = self.alloc(ScopeNode::Block(node), parent);
        let mut body = Vec::new();
        self.index_stmt(&block.body, handle, &mut body);
        self.set_body(handle, body);
        handle
    }

    fn index_stmt(&mut self, stmt: &Stmt, parent: Handle, out: &mut Vec<Item>) {
        match stmt {
            Stmt::Seq(stmts) => {
                for s in stmts {
                    self.index_stmt(s, parent, out);
                }
            }
            Stmt::For(l) => {
                let node = LoopNode { var: l.var.clone(), extent: l.extent, body: Vec::new() };
                let handle = self.alloc(ScopeNode::Loop(node), Some(parent));
                let mut body = Vec::new();
                self.index_stmt(&l.body, handle, &mut body);
                self.set_body(handle, body);
                out.push(Item::Scope(handle));
            }
            Stmt::Block(b) => {
                let handle = self.index_block(b, Some(parent));
                out.push(Item::Scope(handle));
            }
            Stmt::Store { .. } | Stmt::Evaluate(_) => out.push(Item::Stmt(stmt.clone())),
        }
    }

    fn set_body(&mut self, handle: Handle, body: Vec<Item>) {
        if let Ok(node) = self.get_mut(handle) {
            *node.body_mut() = body;
        }
    }

    fn entry(&self, handle: Handle) -> ScheduleResult<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| stale(handle))
    }

    fn entry_mut(&mut self, handle: Handle) -> ScheduleResult<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| stale(handle))
    }

    /// Name of the scheduled function.
    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    pub fn params(&self) -> &[Buffer] {
        &self.params
    }

    /// Handle of the synthetic root block.
    pub fn root(&self) -> Handle {
        self.root
    }

    /// Whether `handle` refers to a live node.
    pub fn contains(&self, handle: Handle) -> bool {
        self.entry(handle).is_ok()
    }

    /// Dereference a handle.
    pub fn get(&self, handle: Handle) -> ScheduleResult<&ScopeNode> {
        self.entry(handle).map(|e| &e.node)
    }

    pub fn get_mut(&mut self, handle: Handle) -> ScheduleResult<&mut ScopeNode> {
        self.entry_mut(handle).map(|e| &mut e.node)
    }

    /// Enclosing scope of `handle`; `None` for the root block.
    pub fn parent(&self, handle: Handle) -> ScheduleResult<Option<Handle>> {
        self.entry(handle).map(|e| e.parent)
    }

    pub fn block(&self, handle: Handle) -> ScheduleResult<&BlockNode> {
        match self.get(handle)? {
            ScopeNode::Block(b) => Ok(b),
            other => Err(ScheduleError::new(
                ScheduleErrorKind::NotFound,
                "locate",
                format!("handle {} refers to {}, not a block", handle, other.describe()),
            )),
        }
    }

    pub fn block_mut(&mut self, handle: Handle) -> ScheduleResult<&mut BlockNode> {
        match self.get_mut(handle)? {
            ScopeNode::Block(b) => Ok(b),
            other => Err(ScheduleError::new(
                ScheduleErrorKind::NotFound,
                "locate",
                format!("handle {} refers to {}, not a block", handle, other.describe()),
            )),
        }
    }

    pub fn loop_node(&self, handle: Handle) -> ScheduleResult<&LoopNode> {
        match self.get(handle)? {
            ScopeNode::Loop(l) => Ok(l),
            other => Err(ScheduleError::new(
                ScheduleErrorKind::NotFound,
                "locate",
                format!("handle {} refers to {}, not a loop", handle, other.describe()),
            )),
        }
    }

    /// Allocate a node under `parent`. The caller links it into the parent body.
    pub fn alloc(&mut self, node: ScopeNode, parent: Option<Handle>) -> Handle {
        let entry = Some(Entry { node, parent });
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = entry;
                Handle { index, generation: slot.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, entry });
                Handle { index: (self.slots.len() - 1) as u32, generation: 0 }
            }
        }
    }

    pub fn set_parent(&mut self, handle: Handle, parent: Handle) -> ScheduleResult<()> {
        self.entry_mut(handle)?.parent = Some(parent);
        Ok(())
    }

    /// Free `handle` and everything below it. The parent body is not touched.
    pub fn free_subtree(&mut self, handle: Handle) -> ScheduleResult<()> {
        let children: Vec<Handle> = self.get(handle)?.children().collect();
        for child in children {
            self.free_subtree(child)?;
        }
        let slot = &mut self.slots[handle.index as usize];
        slot.entry = None;
        slot.generation += 1;
        self.free.push(handle.index);
        Ok(())
    }

    /// Unlink `handle` from its parent and free its subtree.
    pub fn remove(&mut self, handle: Handle) -> ScheduleResult<()> {
        if let Some(parent) = self.parent(handle)? {
            self.get_mut(parent)?
                .body_mut()
                .retain(|item| *item != Item::Scope(handle));
        }
        self.free_subtree(handle)
    }

    /// Replace `old` in its parent body by `new`, keeping the position.
    pub fn replace_in_parent(&mut self, old: Handle, new: Vec<Item>) -> ScheduleResult<()> {
        let parent = self.parent(old)?.ok_or_else(|| stale(old))?;
        for item in &new {
            if let Item::Scope(h) = item {
                self.set_parent(*h, parent)?;
            }
        }
        let body = self.get_mut(parent)?.body_mut();
        if let Some(pos) = body.iter().position(|item| *item == Item::Scope(old)) {
            body.splice(pos..=pos, new);
        }
        Ok(())
    }

    /// Remove loops left without a body, walking up from `start` to the
    /// first block.
    pub fn remove_empty_loops(&mut self, start: Handle) -> ScheduleResult<()> {
        let mut current = start;
        while let ScopeNode::Loop(l) = self.get(current)? {
            if !l.body.is_empty() {
                break;
            }
            let parent = self.parent(current)?.ok_or_else(|| stale(current))?;
            self.remove(current)?;
            current = parent;
        }
        Ok(())
    }

    /// Nearest block strictly enclosing `handle`.
    pub fn enclosing_block(&self, handle: Handle) -> ScheduleResult<Option<Handle>> {
        let mut current = self.parent(handle)?;
        while let Some(h) = current {
            if let ScopeNode::Block(_) = self.get(h)? {
                return Ok(Some(h));
            }
            current = self.parent(h)?;
        }
        Ok(None)
    }

    /// Loops between `block` and its enclosing block, outermost first.
    pub fn loops_of(&self, block: Handle) -> ScheduleResult<Vec<Handle>> {
        let mut loops = Vec::new();
        let mut current = self.parent(block)?;
        while let Some(h) = current {
            match self.get(h)? {
                ScopeNode::Loop(_) => loops.push(h),
                ScopeNode::Block(_) => break,
            }
            current = self.parent(h)?;
        }
        loops.reverse();
        Ok(loops)
    }

    /// Blocks whose nearest enclosing block is `scope`, in program order.
    pub fn child_blocks(&self, scope: Handle) -> ScheduleResult<Vec<Handle>> {
        let mut out = Vec::new();
        let mut stack: Vec<Handle> = self.get(scope)?.children().collect();
        stack.reverse();
        while let Some(h) = stack.pop() {
            match self.get(h)? {
                ScopeNode::Block(_) => out.push(h),
                ScopeNode::Loop(l) => {
                    let mut inner: Vec<Handle> = l.body.iter().filter_map(|item| match item {
                        Item::Scope(c) => Some(*c),
                        Item::Stmt(_) => None,
                    }).collect();
                    inner.reverse();
                    stack.extend(inner);
                }
            }
        }
        Ok(out)
    }

    /// All live blocks, children before parents, siblings left to right.
    pub fn blocks_post_order(&self) -> Vec<Handle> {
        self.blocks_under(self.root)
    }

    /// Blocks of the subtree at `scope`, itself included if it is a block,
    /// in post order.
    pub fn blocks_under(&self, scope: Handle) -> Vec<Handle> {
        fn walk(state: &ScheduleState, handle: Handle, out: &mut Vec<Handle>) {
            if let Ok(node) = state.get(handle) {
                for child in node.children() {
                    walk(state, child, out);
                }
                if let ScopeNode::Block(_) = node {
                    out.push(handle);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, scope, &mut out);
        out
    }

    /// Every live handle reachable from the root, parents before children.
    pub fn reachable(&self) -> Vec<Handle> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(h) = stack.pop() {
            out.push(h);
            if let Ok(node) = self.get(h) {
                let mut children: Vec<Handle> = node.children().collect();
                children.reverse();
                stack.extend(children);
            }
        }
        out
    }

    /// Number of occupied slots.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Resolve a block by name.
    pub fn find_block(&self, name: &str) -> ScheduleResult<Handle> {
        let matches: Vec<Handle> = self
            .blocks_post_order()
            .into_iter()
            .filter(|h| matches!(self.block(*h), Ok(b) if b.name == name))
            .collect();
        match matches.as_slice() {
            [h] => Ok(*h),
            [] => Err(ScheduleError::new(
                ScheduleErrorKind::NotFound,
                "get_block",
                format!("no block named \"{}\" in function \"{}\"", name, self.func_name),
            )),
            _ => Err(ScheduleError::new(
                ScheduleErrorKind::DuplicateBlockName,
                "get_block",
                format!(
                    "{} blocks are named \"{}\" in function \"{}\"",
                    matches.len(),
                    name,
                    self.func_name
                ),
            )),
        }
    }

    /// Buffer declaration by name: parameters first, then allocations.
    pub fn buffer(&self, name: &str) -> Option<&Buffer> {
        self.params.iter().find(|b| b.name == name).or_else(|| {
            self.blocks_post_order().into_iter().find_map(|h| {
                self.block(h).ok().and_then(|b| b.alloc_buffers.iter().find(|buf| buf.name == name))
            })
        })
    }

    fn items_to_stmt(&self, items: &[Item]) -> Stmt {
        Stmt::seq(
            items
                .iter()
                .map(|item| match item {
                    Item::Stmt(s) => s.clone(),
                    Item::Scope(h) => self.scope_to_stmt(*h),
                })
                .collect(),
        )
    }

    fn scope_to_stmt(&self, handle: Handle) -> Stmt {
        match self.get(handle) {
            Ok(ScopeNode::Loop(l)) => Stmt::For(Loop {
                var: l.var.clone(),
                extent: l.extent,
                body: Box::new(self.items_to_stmt(&l.body)),
            }),
            Ok(ScopeNode::Block(_)) => Stmt::Block(self.block_to_tree(handle)),
            Err(_) => Stmt::Seq(Vec::new()),
        }
    }

    fn block_to_tree(&self, handle: Handle) -> Block {
        match self.block(handle) {
            Ok(b) => Block {
                name: b.name.clone(),
                iter_vars: b.iter_vars.clone(),
                reads: b.reads.clone(),
                writes: b.writes.clone(),
                predicate: b.predicate.clone(),
                init: b.init.clone().map(Box::new),
                alloc_buffers: b.alloc_buffers.clone(),
                match_buffers: b.match_buffers.clone(),
                annotations: b.annotations.clone(),
                body: Box::new(self.items_to_stmt(&b.body)),
            },
            Err(_) => Block {
                name: String::new(),
                iter_vars: Vec::new(),
                reads: Vec::new(),
                writes: Vec::new(),
                predicate: None,
                init: None,
                alloc_buffers: Vec::new(),
                match_buffers: Vec::new(),
                annotations: BTreeMap::new(),
                body: Box::new(Stmt::Seq(Vec::new())),
            },
        }
    }

    /// Rebuild the tree form of the current snapshot.
    pub fn to_function(&self) -> Function {
        Function {
            name: self.func_name.clone(),
            params: self.params.clone(),
            root: self.block_to_tree(self.root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{grid, BlockBuilder, FunctionBuilder};
    use crate::ir::stmt::DataType;

    fn two_blocks() -> Function {
        let v = Expr::var;
        FunctionBuilder::new("main")
            .param(Buffer::param("A", &[16], DataType::Float32))
            .param(Buffer::param("C", &[16], DataType::Float32))
            .alloc(Buffer::alloc("B", &[16], DataType::Float32))
            .stmt(grid(
                &[("i", 16)],
                BlockBuilder::new("B")
                    .spatial("vi", 16, v("i"))
                    .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                    .into_stmt(),
            ))
            .stmt(grid(
                &[("i", 16)],
                BlockBuilder::new("C")
                    .spatial("vi", 16, v("i"))
                    .store("C", vec![v("vi")], Expr::load("B", vec![v("vi")]) + 1.0)
                    .into_stmt(),
            ))
            .build()
    }

    #[test]
    fn test_roundtrip() {
        let func = two_blocks();
        let state = ScheduleState::new(&func);
        assert_eq!(state.to_function(), func);
        assert_eq!(state.live_count(), 5);
    }

    #[test]
    fn test_parent_and_root() {
        let state = ScheduleState::new(&two_blocks());
        let b = state.find_block("B").unwrap();
        assert_eq!(state.parent(state.root()).unwrap(), None);
        assert_eq!(state.enclosing_block(b).unwrap(), Some(state.root()));
        assert_eq!(state.loops_of(b).unwrap().len(), 1);
        assert_eq!(state.child_blocks(state.root()).unwrap().len(), 2);
    }

    #[test]
    fn test_stale_after_remove() {
        let mut state = ScheduleState::new(&two_blocks());
        let b = state.find_block("B").unwrap();
        let loop_b = state.loops_of(b).unwrap()[0];
        state.remove(b).unwrap();
        state.remove_empty_loops(loop_b).unwrap();
        let err = state.get(b).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::StaleHandle);
        assert!(!state.contains(loop_b));
        assert_eq!(state.find_block("B").unwrap_err().kind, ScheduleErrorKind::NotFound);

        // a reused slot does not revive the old handle
        let h = state.alloc(
            ScopeNode::Loop(LoopNode { var: "x".into(), extent: 1, body: Vec::new() }),
            Some(state.root()),
        );
        assert!(state.contains(h));
        assert!(!state.contains(b));
        assert!(!state.contains(loop_b));
    }

    #[test]
    fn test_post_order() {
        let state = ScheduleState::new(&two_blocks());
        let names: Vec<String> = state
            .blocks_post_order()
            .into_iter()
            .map(|h| state.block(h).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["B", "C", "root"]);
    }
}
