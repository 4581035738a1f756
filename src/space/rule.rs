//! Schedule rules: per-block generators of candidate schedules.

use super::context::TuneContext;
use crate::schedule::{BlockRV, LoopRV, Schedule};
use anyhow::Result;
use log::{debug, trace};
use std::fmt;

/// A rule turns one schedule into one or more candidate schedules by
/// rewriting around a single block.
///
/// `apply` owns its input and must return at least one schedule. The
/// function's root block is offered too; a rule with nothing to do at
/// function scope returns its input unchanged.
pub trait ScheduleRule: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Called once before generation starts
    fn initialize_with_tune_context(&self, _context: &TuneContext) -> Result<()> {
        Ok(())
    }

    /// Produce candidates for `block`
    fn apply(&self, sch: Schedule, block: BlockRV) -> Result<Vec<Schedule>>;
}

/// A rule backed by a closure, for callbacks registered at run time.
pub struct FnRule<F> {
    name: String,
    func: F,
}

impl<F> FnRule<F>
where
    F: Fn(Schedule, BlockRV) -> Result<Vec<Schedule>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self { name: name.into(), func }
    }
}

impl<F> ScheduleRule for FnRule<F>
where
    F: Fn(Schedule, BlockRV) -> Result<Vec<Schedule>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, sch: Schedule, block: BlockRV) -> Result<Vec<Schedule>> {
        (self.func)(sch, block)
    }
}

impl<F> fmt::Debug for FnRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("name", &self.name).finish()
    }
}

/// Inline every block that can be inlined.
///
/// Tries `compute_inline` first and, when enabled, falls back to
/// `reverse_compute_inline`. A block that cannot be inlined either way is
/// left alone, so the rule always yields exactly one candidate.
#[derive(Debug, Clone, Default)]
pub struct AutoInline {
    reverse: bool,
}

impl AutoInline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also try folding consumers into their producer
    pub fn with_reverse(mut self, enable: bool) -> Self {
        self.reverse = enable;
        self
    }
}

impl ScheduleRule for AutoInline {
    fn name(&self) -> &str {
        "auto_inline"
    }

    fn apply(&self, mut sch: Schedule, block: BlockRV) -> Result<Vec<Schedule>> {
        if sch.is_root(block)? {
            return Ok(vec![sch]);
        }
        let name = sch.block_name(block)?.to_string();
        match sch.compute_inline(block) {
            Ok(()) => return Ok(vec![sch]),
            Err(e) => trace!("auto_inline: {}", e),
        }
        if self.reverse {
            match sch.reverse_compute_inline(block) {
                Ok(()) => return Ok(vec![sch]),
                Err(e) => trace!("auto_inline: {}", e),
            }
        }
        debug!("auto_inline: block \"{}\" kept", name);
        Ok(vec![sch])
    }
}

/// Two-level tiling: one candidate per inner factor.
///
/// Every loop of the block whose extent is a proper multiple of the factor
/// is split as `[None, factor]`; the outer loops are then placed before all
/// inner loops.
#[derive(Debug, Clone)]
pub struct TileSplit {
    factors: Vec<i64>,
}

impl TileSplit {
    pub fn new(factors: Vec<i64>) -> Self {
        Self { factors }
    }

    pub fn factors(&self) -> &[i64] {
        &self.factors
    }

    fn tile(&self, sch: &Schedule, block: BlockRV, factor: i64) -> Result<Option<Schedule>> {
        let mut candidate = sch.copy();
        let loops = candidate.get_loops(block)?;
        let mut outers: Vec<LoopRV> = Vec::new();
        let mut inners: Vec<LoopRV> = Vec::new();
        for l in loops {
            let extent = candidate.state().loop_node(l.handle())?.extent;
            if factor <= 0 || extent <= factor || extent % factor != 0 {
                continue;
            }
            let split = candidate.split(l, &[None, Some(factor)])?;
            outers.push(split[0]);
            inners.push(split[1]);
        }
        if outers.is_empty() {
            return Ok(None);
        }
        outers.extend(inners);
        candidate.reorder(&outers)?;
        Ok(Some(candidate))
    }
}

impl ScheduleRule for TileSplit {
    fn name(&self) -> &str {
        "tile_split"
    }

    fn apply(&self, sch: Schedule, block: BlockRV) -> Result<Vec<Schedule>> {
        if sch.is_root(block)? {
            return Ok(vec![sch]);
        }
        let mut out = Vec::new();
        for &factor in &self.factors {
            if let Some(candidate) = self.tile(&sch, block, factor)? {
                out.push(candidate);
            }
        }
        if out.is_empty() {
            debug!("tile_split: no loop of block \"{}\" divides by {:?}", sch.block_name(block)?, self.factors);
            out.push(sch);
        }
        Ok(out)
    }
}
