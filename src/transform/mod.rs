//! Schedule primitives operating directly on a [`ScheduleState`].
//!
//! These functions validate first and mutate afterwards. [`Schedule`]
//! additionally runs them on a scratch copy and records them in the trace.
//!
//! [`Schedule`]: crate::schedule::Schedule

pub mod inline;
pub mod loops;

use crate::ir::expr::Expr;
use crate::schedule::state::{Handle, Item, ScheduleState, ScopeNode};
use crate::utils::errors::ScheduleResult;

/// Apply `f` to every expression below `handle`: bindings, predicates, inits
/// and leaf statements. Region bounds are not touched.
pub fn rewrite_subtree(
    state: &mut ScheduleState,
    handle: Handle,
    f: &mut impl FnMut(&Expr) -> Expr,
) -> ScheduleResult<()> {
    let node = state.get_mut(handle)?;
    if let ScopeNode::Block(b) = &mut *node {
        for iv in &mut b.iter_vars {
            iv.binding = f(&iv.binding);
        }
        b.predicate = b.predicate.as_ref().map(|p| f(p));
        b.init = b.init.as_ref().map(|s| s.map_exprs(f));
    }
    for item in node.body_mut().iter_mut() {
        if let Item::Stmt(s) = item {
            *s = s.map_exprs(f);
        }
    }
    let children: Vec<Handle> = node.children().collect();
    for child in children {
        rewrite_subtree(state, child, f)?;
    }
    Ok(())
}

/// Remove a block together with the loops it leaves empty.
pub fn remove_block(state: &mut ScheduleState, block: Handle) -> ScheduleResult<()> {
    let parent = state.parent(block)?;
    state.remove(block)?;
    if let Some(parent) = parent {
        state.remove_empty_loops(parent)?;
    }
    Ok(())
}
