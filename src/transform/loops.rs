//! Loop primitives: split and reorder.

use crate::ir::expr::Expr;
use crate::schedule::state::{Handle, Item, LoopNode, ScheduleState, ScopeNode};
use crate::transform::rewrite_subtree;
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use std::collections::{HashMap, HashSet};

const SPLIT: &str = "split";
const REORDER: &str = "reorder";

fn factor_error(var: &str, message: String) -> ScheduleError {
    ScheduleError::new(ScheduleErrorKind::FactorMismatch, SPLIT, format!("loop \"{}\": {}", var, message))
}

/// Resolve split factors against `extent`. At most one factor may be `None`.
pub fn resolve_factors(var: &str, extent: i64, factors: &[Option<i64>]) -> ScheduleResult<Vec<i64>> {
    if factors.is_empty() {
        return Err(factor_error(var, "no factors given".to_string()));
    }
    let unknown = factors.iter().filter(|f| f.is_none()).count();
    if unknown > 1 {
        return Err(factor_error(var, format!("{} factors left to infer, at most 1 allowed", unknown)));
    }
    if let Some(bad) = factors.iter().flatten().find(|f| **f <= 0) {
        return Err(factor_error(var, format!("factor {} is not positive", bad)));
    }
    let known: i64 = factors.iter().flatten().product();
    if unknown == 1 {
        if extent % known != 0 {
            return Err(factor_error(var, format!("extent {} is not divisible by {}", extent, known)));
        }
        let inferred = extent / known;
        Ok(factors.iter().map(|f| f.unwrap_or(inferred)).collect())
    } else if known != extent {
        Err(factor_error(var, format!("factors multiply to {}, extent is {}", known, extent)))
    } else {
        Ok(factors.iter().flatten().copied().collect())
    }
}

fn loop_var_names(state: &ScheduleState) -> HashSet<String> {
    state
        .reachable()
        .into_iter()
        .filter_map(|h| state.loop_node(h).ok().map(|l| l.var.clone()))
        .collect()
}

/// Split `loop_handle` into a nest of `factors.len()` loops, outermost first.
/// Returns the new loops and the resolved factors.
pub fn split(
    state: &mut ScheduleState,
    loop_handle: Handle,
    factors: &[Option<i64>],
) -> ScheduleResult<(Vec<Handle>, Vec<i64>)> {
    let node = state.loop_node(loop_handle).map_err(|e| e.during(SPLIT))?.clone();
    let resolved = resolve_factors(&node.var, node.extent, factors)?;

    let taken = loop_var_names(state);
    let vars: Vec<String> = (0..resolved.len())
        .map(|k| {
            let mut name = format!("{}_{}", node.var, k);
            while taken.contains(&name) {
                name.push('_');
            }
            name
        })
        .collect();

    // var = v0 * (f1 * ... * fn) + v1 * (f2 * ... * fn) + ... + vn
    let mut fused: Option<Expr> = None;
    for (k, var) in vars.iter().enumerate() {
        let stride: i64 = resolved[k + 1..].iter().product();
        let term = if stride == 1 { Expr::var(var) } else { Expr::var(var) * stride };
        fused = Some(match fused {
            Some(acc) => acc + term,
            None => term,
        });
    }
    let mut map = HashMap::new();
    map.insert(node.var.clone(), fused.unwrap_or(Expr::Int(0)));
    rewrite_subtree(state, loop_handle, &mut |e| {
        if e.uses_var(&node.var) {
            e.substitute(&map).simplify()
        } else {
            e.clone()
        }
    })?;

    let body = std::mem::take(state.get_mut(loop_handle)?.body_mut());
    let parent = state.parent(loop_handle)?;
    let mut handles: Vec<Handle> = Vec::with_capacity(vars.len());
    for (var, extent) in vars.iter().zip(&resolved) {
        let h = state.alloc(
            ScopeNode::Loop(LoopNode { var: var.clone(), extent: *extent, body: Vec::new() }),
            parent,
        );
        if let Some(&outer) = handles.last() {
            state.get_mut(outer)?.body_mut().push(Item::Scope(h));
            state.set_parent(h, outer)?;
        }
        handles.push(h);
    }
    let (outermost, innermost) = match (handles.first(), handles.last()) {
        (Some(o), Some(i)) => (*o, *i),
        _ => return Err(factor_error(&node.var, "no factors given".to_string())),
    };
    for item in &body {
        if let Item::Scope(child) = item {
            state.set_parent(*child, innermost)?;
        }
    }
    *state.get_mut(innermost)?.body_mut() = body;
    state.replace_in_parent(loop_handle, vec![Item::Scope(outermost)])?;
    state.free_subtree(loop_handle)?;
    Ok((handles, resolved))
}

fn chain_error(message: String) -> ScheduleError {
    ScheduleError::new(ScheduleErrorKind::NotLoopChain, REORDER, message)
}

/// Reorder loops of a single nest so that they appear in `order`, outermost
/// first. Loops of the nest not named in `order` keep their position.
pub fn reorder(state: &mut ScheduleState, order: &[Handle]) -> ScheduleResult<()> {
    let mut seen = HashSet::new();
    for &h in order {
        state.loop_node(h).map_err(|e| e.during(REORDER))?;
        if !seen.insert(h) {
            let var = &state.loop_node(h)?.var;
            return Err(chain_error(format!("loop \"{}\" is listed twice", var)));
        }
    }
    if order.len() < 2 {
        return Ok(());
    }

    // the deepest listed loop; walking up from it must reach every other one
    let depth = |h: Handle| -> ScheduleResult<usize> {
        let mut d = 0;
        let mut current = state.parent(h)?;
        while let Some(p) = current {
            d += 1;
            current = state.parent(p)?;
        }
        Ok(d)
    };
    let mut deepest = order[0];
    for &h in &order[1..] {
        if depth(h)? > depth(deepest)? {
            deepest = h;
        }
    }
    let mut path = vec![deepest];
    let mut remaining = order.len() - 1;
    let mut current = deepest;
    while remaining > 0 {
        let parent = match state.parent(current)? {
            Some(p) => p,
            None => break,
        };
        match state.get(parent)? {
            ScopeNode::Loop(l) if l.body.len() == 1 => {}
            ScopeNode::Loop(l) => {
                return Err(chain_error(format!("loop \"{}\" has {} statements in its body", l.var, l.body.len())))
            }
            ScopeNode::Block(b) => {
                return Err(chain_error(format!("block \"{}\" separates the loops", b.name)))
            }
        }
        if seen.contains(&parent) {
            remaining -= 1;
        }
        path.push(parent);
        current = parent;
    }
    if remaining > 0 {
        return Err(chain_error("loops do not belong to one nest".to_string()));
    }
    path.reverse();

    let mut next = order.iter();
    let new_path: Vec<Handle> = path
        .iter()
        .map(|h| if seen.contains(h) { next.next().copied().unwrap_or(*h) } else { *h })
        .collect();
    if new_path == path {
        return Ok(());
    }

    let inner_body = std::mem::take(state.get_mut(deepest)?.body_mut());
    state.replace_in_parent(path[0], vec![Item::Scope(new_path[0])])?;
    for pair in new_path.windows(2) {
        *state.get_mut(pair[0])?.body_mut() = vec![Item::Scope(pair[1])];
        state.set_parent(pair[1], pair[0])?;
    }
    let innermost = new_path[new_path.len() - 1];
    for item in &inner_body {
        if let Item::Scope(child) = item {
            state.set_parent(*child, innermost)?;
        }
    }
    *state.get_mut(innermost)?.body_mut() = inner_body;
    Ok(())
}
