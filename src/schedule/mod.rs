//! Schedules: a function snapshot, its location index and a trace.
//!
//! A [`Schedule`] exclusively owns its state. [`Schedule::copy`] deep-clones
//! everything, so forks never observe each other's mutations. Every primitive
//! either succeeds and updates state and trace together, or fails and leaves
//! both untouched.

pub mod state;
pub mod trace;

pub use state::{BlockNode, Handle, Item, LoopNode, ScheduleState, ScopeNode};
pub use trace::{InstArg, InstId, InstKind, Instruction, Rv, RvId, Trace};

use crate::ir::stmt::Function;
use crate::transform::{inline, loops};
use crate::utils::errors::ScheduleResult;
use log::debug;
use serde::{Serialize, Deserialize};

/// A block produced by one traced lookup.
///
/// Two lookups of the same block yield distinct random variables that
/// resolve to the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRV {
    pub(crate) handle: Handle,
    pub(crate) id: RvId,
}

/// A loop produced by one traced primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopRV {
    pub(crate) handle: Handle,
    pub(crate) id: RvId,
}

impl BlockRV {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn rv(&self) -> Rv {
        Rv::Block(self.id)
    }
}

impl LoopRV {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn rv(&self) -> Rv {
        Rv::Loop(self.id)
    }
}

/// A function under scheduling.
#[derive(Debug, Clone)]
pub struct Schedule {
    state: ScheduleState,
    trace: Trace,
}

impl Schedule {
    /// Start scheduling a copy of `func` with an empty trace.
    pub fn new(func: &Function) -> Self {
        Self { state: ScheduleState::new(func), trace: Trace::new() }
    }

    /// Deep copy; the fork shares no mutable state with `self`.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The current function.
    pub fn func(&self) -> Function {
        self.state.to_function()
    }

    pub fn func_name(&self) -> &str {
        self.state.func_name()
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Whether the block is still live in this schedule.
    pub fn contains(&self, block: BlockRV) -> bool {
        self.state.contains(block.handle)
    }

    /// Whether `block` is the function's root block.
    pub fn is_root(&self, block: BlockRV) -> ScheduleResult<bool> {
        Ok(self.state.parent(block.handle)?.is_none())
    }

    pub fn block_name(&self, block: BlockRV) -> ScheduleResult<&str> {
        Ok(self.state.block(block.handle)?.name.as_str())
    }

    pub fn annotation(&self, block: BlockRV, key: &str) -> ScheduleResult<Option<&str>> {
        Ok(self.state.block(block.handle)?.annotations.get(key).map(String::as_str))
    }

    /// Run `f` on a scratch copy of the state and commit only on success.
    ///
    /// The copy costs one clone of the arena per primitive. Within `f` only
    /// the touched subtree is reindexed: every other node keeps its slot and
    /// generation, so handles held outside that subtree stay valid across
    /// the commit.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut ScheduleState) -> ScheduleResult<T>,
    ) -> ScheduleResult<T> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        self.state = next;
        Ok(out)
    }

    fn fresh_loops(&mut self, handles: Vec<Handle>) -> Vec<LoopRV> {
        handles.into_iter().map(|handle| LoopRV { handle, id: self.trace.fresh_rv() }).collect()
    }

    /// Look up a block by name.
    pub fn get_block(&mut self, name: &str) -> ScheduleResult<BlockRV> {
        let handle = self.state.find_block(name)?;
        let id = self.trace.fresh_rv();
        self.trace.append(
            InstKind::GetBlock,
            Vec::new(),
            vec![
                ("name".to_string(), name.to_string()),
                ("func_name".to_string(), self.state.func_name().to_string()),
            ],
            vec![Rv::Block(id)],
        );
        Ok(BlockRV { handle, id })
    }

    /// Loops between `block` and its enclosing block, outermost first.
    pub fn get_loops(&mut self, block: BlockRV) -> ScheduleResult<Vec<LoopRV>> {
        self.state.block(block.handle).map_err(|e| e.during("get_loops"))?;
        let loops = self.state.loops_of(block.handle).map_err(|e| e.during("get_loops"))?;
        let loops = self.fresh_loops(loops);
        self.trace.append(
            InstKind::GetLoops,
            vec![InstArg::Rv(block.rv())],
            Vec::new(),
            loops.iter().map(LoopRV::rv).collect(),
        );
        Ok(loops)
    }

    /// Split a loop into a nest. At most one factor may be `None`; it is
    /// inferred from the extent and recorded as the decision.
    pub fn split(&mut self, loop_rv: LoopRV, factors: &[Option<i64>]) -> ScheduleResult<Vec<LoopRV>> {
        let (new_loops, resolved) = self.transact(|state| loops::split(state, loop_rv.handle, factors))?;
        debug!("split {} by {:?} into {} loops", loop_rv.handle, resolved, new_loops.len());
        let new_loops = self.fresh_loops(new_loops);
        let inputs = std::iter::once(InstArg::Rv(loop_rv.rv()))
            .chain(factors.iter().map(|f| match f {
                Some(v) => InstArg::Int(*v),
                None => InstArg::None,
            }))
            .collect();
        let id = self.trace.append(
            InstKind::Split,
            inputs,
            Vec::new(),
            new_loops.iter().map(LoopRV::rv).collect(),
        );
        if factors.iter().any(Option::is_none) {
            self.trace.record_decision(id, resolved);
        }
        Ok(new_loops)
    }

    /// Permute loops of one nest. `order` lists the loops outermost first.
    pub fn reorder(&mut self, order: &[LoopRV]) -> ScheduleResult<()> {
        let handles: Vec<Handle> = order.iter().map(|l| l.handle).collect();
        self.transact(|state| loops::reorder(state, &handles))?;
        debug!("reorder {} loops", handles.len());
        self.trace.append(
            InstKind::Reorder,
            order.iter().map(|l| InstArg::Rv(l.rv())).collect(),
            Vec::new(),
            Vec::new(),
        );
        Ok(())
    }

    /// Inline a producer block into its consumers.
    pub fn compute_inline(&mut self, block: BlockRV) -> ScheduleResult<()> {
        let name = self.block_name(block).map_err(|e| e.during("compute_inline"))?.to_string();
        self.transact(|state| inline::compute_inline(state, block.handle))?;
        debug!("compute_inline removed block \"{}\"", name);
        self.trace.append(
            InstKind::ComputeInline,
            vec![InstArg::Rv(block.rv())],
            Vec::new(),
            Vec::new(),
        );
        Ok(())
    }

    /// Fold a consumer block into its single producer.
    pub fn reverse_compute_inline(&mut self, block: BlockRV) -> ScheduleResult<()> {
        let name = self
            .block_name(block)
            .map_err(|e| e.during("reverse_compute_inline"))?
            .to_string();
        self.transact(|state| inline::reverse_compute_inline(state, block.handle))?;
        debug!("reverse_compute_inline removed block \"{}\"", name);
        self.trace.append(
            InstKind::ReverseComputeInline,
            vec![InstArg::Rv(block.rv())],
            Vec::new(),
            Vec::new(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{grid, BlockBuilder, FunctionBuilder};
    use crate::ir::expr::Expr;
    use crate::ir::stmt::{Buffer, DataType};
    use crate::utils::errors::ScheduleErrorKind;

    fn matmul() -> Function {
        let v = Expr::var;
        FunctionBuilder::new("main")
            .param(Buffer::param("A", &[64, 64], DataType::Float32))
            .param(Buffer::param("B", &[64, 64], DataType::Float32))
            .param(Buffer::param("C", &[64, 64], DataType::Float32))
            .stmt(grid(
                &[("i", 64), ("j", 64), ("k", 64)],
                BlockBuilder::new("matmul")
                    .spatial("vi", 64, v("i"))
                    .spatial("vj", 64, v("j"))
                    .reduce("vk", 64, v("k"))
                    .init(crate::ir::stmt::Stmt::store("C", vec![v("vi"), v("vj")], Expr::float(0.0)))
                    .store(
                        "C",
                        vec![v("vi"), v("vj")],
                        Expr::load("C", vec![v("vi"), v("vj")])
                            + Expr::load("A", vec![v("vi"), v("vk")])
                                * Expr::load("B", vec![v("vk"), v("vj")]),
                    )
                    .into_stmt(),
            ))
            .build()
    }

    #[test]
    fn test_copy_is_independent() {
        let mut sch = Schedule::new(&matmul());
        let fork = sch.copy();
        let block = sch.get_block("matmul").unwrap();
        let loops = sch.get_loops(block).unwrap();
        sch.split(loops[2], &[Some(8), Some(8)]).unwrap();
        assert!(fork.trace().is_empty());
        assert_eq!(fork.func(), matmul());
        assert_ne!(sch.func(), matmul());
    }

    #[test]
    fn test_split_factor_mismatch_keeps_schedule() {
        let mut sch = Schedule::new(&matmul());
        let block = sch.get_block("matmul").unwrap();
        let loops = sch.get_loops(block).unwrap();
        let before = sch.func();
        let trace_len = sch.trace().len();
        let err = sch.split(loops[0], &[Some(3), None]).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::FactorMismatch);
        let err = sch.split(loops[0], &[None, None]).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::FactorMismatch);
        assert_eq!(sch.func(), before);
        assert_eq!(sch.trace().len(), trace_len);
        assert!(sch.state().contains(loops[0].handle()));
    }

    #[test]
    fn test_root_block() {
        let mut sch = Schedule::new(&matmul());
        let root = sch.get_block("root").unwrap();
        let block = sch.get_block("matmul").unwrap();
        assert!(sch.is_root(root).unwrap());
        assert!(!sch.is_root(block).unwrap());
        assert!(sch.get_loops(root).unwrap().is_empty());
    }

    #[test]
    fn test_untouched_handles_survive_commit() {
        let v = Expr::var;
        let block = |name: &str, out: &str, input: &str| {
            grid(
                &[("i", 32)],
                BlockBuilder::new(name)
                    .spatial("vi", 32, v("i"))
                    .store(out, vec![v("vi")], Expr::load(input, vec![v("vi")]) + 1.0)
                    .into_stmt(),
            )
        };
        let func = FunctionBuilder::new("main")
            .param(Buffer::param("A", &[32], DataType::Float32))
            .param(Buffer::param("B", &[32], DataType::Float32))
            .param(Buffer::param("C", &[32], DataType::Float32))
            .stmt(block("B", "B", "A"))
            .stmt(block("C", "C", "A"))
            .build();
        let mut sch = Schedule::new(&func);
        let b = sch.get_block("B").unwrap();
        let c = sch.get_block("C").unwrap();
        let b_loops = sch.get_loops(b).unwrap();
        let c_loops = sch.get_loops(c).unwrap();
        sch.split(c_loops[0], &[Some(4), None]).unwrap();
        assert!(sch.state().contains(b_loops[0].handle()));
        assert!(!sch.state().contains(c_loops[0].handle()));
        assert_eq!(sch.get_loops(b).unwrap()[0].handle(), b_loops[0].handle());
        assert_eq!(sch.get_loops(c).unwrap().len(), 2);
    }

    #[test]
    fn test_get_block_errors() {
        let mut sch = Schedule::new(&matmul());
        let err = sch.get_block("missing").unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::NotFound);
        assert!(err.to_string().contains("\"missing\""));
        assert!(sch.trace().is_empty());
    }
}
