//! Consistency checks on a schedule state.
//!
//! Run after primitives in debug mode. Checks that the location index is
//! exact (every live node reachable once, parent links agree with bodies,
//! no leaked slots), that block names are unique, and that declared regions
//! cover what each block accesses.

use crate::ir::expr::Expr;
use crate::ir::stmt::{BufferRegion, Stmt};
use crate::schedule::state::{BlockNode, Handle, Item, ScheduleState, ScopeNode};
use anyhow::{bail, Result};
use std::collections::HashSet;

/// Verify `state`, reporting every violation found.
pub fn verify(state: &ScheduleState) -> Result<()> {
    let mut errors = Vec::new();
    check_index(state, &mut errors);
    check_names(state, &mut errors);
    for h in state.blocks_post_order() {
        if state.parent(h).ok().flatten().is_none() {
            continue;
        }
        if let Ok(block) = state.block(h) {
            check_regions(state, h, block, &mut errors);
        }
    }
    if !errors.is_empty() {
        bail!("{} violation(s): {}", errors.len(), errors.join("; "));
    }
    Ok(())
}

fn check_index(state: &ScheduleState, errors: &mut Vec<String>) {
    let reachable = state.reachable();
    let mut seen = HashSet::new();
    for &h in &reachable {
        if !seen.insert(h) {
            errors.push(format!("node {} is reachable twice", h));
        }
        let node = match state.get(h) {
            Ok(node) => node,
            Err(e) => {
                errors.push(e.to_string());
                continue;
            }
        };
        for child in node.children() {
            match state.parent(child) {
                Ok(Some(p)) if p == h => {}
                _ => errors.push(format!("node {} has a wrong parent link", child)),
            }
        }
    }
    if state.live_count() != reachable.len() {
        errors.push(format!(
            "{} live nodes but {} reachable from the root",
            state.live_count(),
            reachable.len()
        ));
    }
}

fn check_names(state: &ScheduleState, errors: &mut Vec<String>) {
    let mut names = HashSet::new();
    for h in state.blocks_post_order() {
        if let Ok(block) = state.block(h) {
            if !names.insert(block.name.clone()) {
                errors.push(format!("block name \"{}\" is used twice", block.name));
            }
        }
    }
}

/// Whether `region` contains the element at `indices`. Ranges wider than a
/// point are assumed to cover.
fn covers(region: &BufferRegion, indices: &[Expr]) -> bool {
    region.region.len() == indices.len()
        && region.region.iter().zip(indices).all(|(r, idx)| match r.extent.as_int() {
            Some(1) => r.min.simplify() == idx.simplify(),
            _ => true,
        })
}

fn check_expr(block: &BlockNode, local: &HashSet<&str>, e: &Expr, errors: &mut Vec<String>) {
    e.visit(&mut |sub| match sub {
        Expr::Load { buffer, indices } if !local.contains(buffer.as_str()) => {
            if !block.reads.iter().any(|r| r.buffer == *buffer && covers(r, indices)) {
                errors.push(format!("block \"{}\" loads {} outside its read regions", block.name, sub));
            }
        }
        Expr::AccessPtr { buffer, .. } if !local.contains(buffer.as_str()) => {
            let declared = block.reads.iter().chain(&block.writes).any(|r| r.buffer == *buffer);
            if !declared {
                errors.push(format!("block \"{}\" takes a pointer to undeclared {}", block.name, buffer));
            }
        }
        _ => {}
    });
}

fn check_regions(state: &ScheduleState, handle: Handle, block: &BlockNode, errors: &mut Vec<String>) {
    let local: HashSet<&str> = block
        .alloc_buffers
        .iter()
        .map(|b| b.name.as_str())
        .chain(block.match_buffers.iter().map(|m| m.buffer.name.as_str()))
        .collect();
    let mut stmts = Vec::new();
    if let Some(init) = &block.init {
        stmts.push(init.clone());
    }
    collect_leaves(state, handle, &mut stmts);
    if let Some(p) = &block.predicate {
        check_expr(block, &local, p, errors);
    }
    for stmt in &stmts {
        stmt.visit_stores(&mut |buffer, indices| {
            if !local.contains(buffer) && !block.writes.iter().any(|r| r.buffer == buffer && covers(r, indices)) {
                errors.push(format!("block \"{}\" stores to {} outside its write regions", block.name, buffer));
            }
        });
        for root in stmt_roots(stmt) {
            check_expr(block, &local, root, errors);
        }
    }
}

/// Top-level expressions of a leaf statement.
fn stmt_roots(stmt: &Stmt) -> Vec<&Expr> {
    match stmt {
        Stmt::Store { indices, value, .. } => indices.iter().chain(std::iter::once(value)).collect(),
        Stmt::Evaluate(e) => vec![e],
        Stmt::Seq(stmts) => stmts.iter().flat_map(stmt_roots).collect(),
        Stmt::For(l) => stmt_roots(&l.body),
        Stmt::Block(_) => Vec::new(),
    }
}

/// Leaf statements of the block, through loops but not into nested blocks.
fn collect_leaves(state: &ScheduleState, handle: Handle, out: &mut Vec<Stmt>) {
    let node = match state.get(handle) {
        Ok(node) => node,
        Err(_) => return,
    };
    for item in node.body() {
        match item {
            Item::Stmt(s) => out.push(s.clone()),
            Item::Scope(child) => {
                if let Ok(ScopeNode::Loop(_)) = state.get(*child) {
                    collect_leaves(state, *child, out);
                }
            }
        }
    }
}
