//! Forward and reverse compute-inline.
//!
//! Forward inline removes a producer block and substitutes the value it
//! stores into every load of its buffer. Reverse inline removes a consumer
//! block and folds its store into the sole producer, expressing the
//! consumer's iteration variables through the inverse of its load index.
//! Both drop the intermediate allocation once nothing refers to it.

use crate::analysis::affine::BijectiveMap;
use crate::analysis::dependence::{aliasing_block, has_opaque_access, is_referenced, BlockScope};
use crate::ir::expr::Expr;
use crate::ir::stmt::{BufferRegion, BufferScope, IterKind, Stmt};
use crate::schedule::state::{BlockNode, Handle, Item, ScheduleState};
use crate::transform::{remove_block, rewrite_subtree};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use log::trace;
use std::collections::HashMap;

const COMPUTE_INLINE: &str = "compute_inline";
const REVERSE_COMPUTE_INLINE: &str = "reverse_compute_inline";

fn fail<T>(kind: ScheduleErrorKind, primitive: &str, message: String) -> ScheduleResult<T> {
    Err(ScheduleError::new(kind, primitive, message))
}

/// The single store of a block.
#[derive(Debug, Clone)]
struct StoreInfo {
    buffer: String,
    indices: Vec<Expr>,
    value: Expr,
}

/// A block without reduction, writing one buffer with one store.
fn single_store(node: &BlockNode, primitive: &str) -> ScheduleResult<StoreInfo> {
    if node.init.is_some() || node.iter_vars.iter().any(|iv| iv.kind == IterKind::Reduce) {
        return fail(
            ScheduleErrorKind::ReductionInline,
            primitive,
            format!("block \"{}\" is a reduction", node.name),
        );
    }
    if node.writes.len() != 1 {
        return fail(
            ScheduleErrorKind::MultiWriter,
            primitive,
            format!("block \"{}\" writes {} buffers, expected 1", node.name, node.writes.len()),
        );
    }
    match node.single_store() {
        Some((buffer, indices, value)) if buffer == node.writes[0].buffer => Ok(StoreInfo {
            buffer: buffer.to_string(),
            indices: indices.to_vec(),
            value: value.clone(),
        }),
        _ => fail(
            ScheduleErrorKind::ComplexBody,
            primitive,
            format!("body of block \"{}\" is not a single store to its written buffer", node.name),
        ),
    }
}

/// How the producer's iteration variables reach its store indices. The
/// producer must write every point of its domain exactly once; the indices
/// may fuse and split variables as long as the store stays one-to-one.
fn producer_map(node: &BlockNode, store: &StoreInfo, primitive: &str) -> ScheduleResult<BijectiveMap> {
    if node.predicate.is_some() {
        return fail(
            ScheduleErrorKind::ComplexBody,
            primitive,
            format!("block \"{}\" writes {} only under a predicate", node.name, store.buffer),
        );
    }
    let map = BijectiveMap::detect(&store.indices, &node.domain()).or_else(|reason| {
        fail(
            ScheduleErrorKind::ComplexBody,
            primitive,
            format!("block \"{}\" does not store to {} one-to-one: {}", node.name, store.buffer, reason),
        )
    })?;
    if store.value.uses_buffer(&store.buffer) {
        return fail(
            ScheduleErrorKind::ReductionInline,
            primitive,
            format!("block \"{}\" reads the buffer {} it writes", node.name, store.buffer),
        );
    }
    Ok(map)
}

/// Buffer-level preconditions shared by both directions.
fn check_buffer(state: &ScheduleState, buffer: &str, block: &str, primitive: &str) -> ScheduleResult<()> {
    let is_param = state
        .params()
        .iter()
        .any(|b| b.name == buffer && b.scope == BufferScope::Boundary);
    if is_param {
        return fail(
            ScheduleErrorKind::OutputBlock,
            primitive,
            format!("block \"{}\" writes the function parameter {}", block, buffer),
        );
    }
    if has_opaque_access(state, buffer)? {
        return fail(
            ScheduleErrorKind::OpaqueAccess,
            primitive,
            format!("buffer {} written by block \"{}\" is accessed through an opaque pointer", buffer, block),
        );
    }
    if let Some(alias) = aliasing_block(state, buffer)? {
        return fail(
            ScheduleErrorKind::BufferAlias,
            primitive,
            format!("block \"{}\" declares a sub-view of buffer {}", alias, buffer),
        );
    }
    Ok(())
}

/// Values of the producer's iteration variables at one load.
fn bind_producer(node: &BlockNode, map: &BijectiveMap, indices: &[Expr]) -> HashMap<String, Expr> {
    let values = map.inverse(indices, node.iter_vars.len());
    node.iter_vars.iter().map(|iv| iv.var.clone()).zip(values).collect()
}

fn push_unique(regions: &mut Vec<BufferRegion>, region: BufferRegion) {
    if !regions.contains(&region) {
        regions.push(region);
    }
}

/// Read regions of a consumer once `buffer` is replaced by the producer's reads.
fn inline_read_regions(
    state: &ScheduleState,
    reads: &[BufferRegion],
    buffer: &str,
    producer: &BlockNode,
    map: &BijectiveMap,
) -> Vec<BufferRegion> {
    let mut out = Vec::new();
    for region in reads {
        if region.buffer != buffer {
            push_unique(&mut out, region.clone());
            continue;
        }
        let is_point = region.region.iter().all(|r| r.extent.as_int() == Some(1));
        for read in &producer.reads {
            let rebound = if is_point {
                let mins: Vec<Expr> = region.region.iter().map(|r| r.min.clone()).collect();
                read.substitute(&bind_producer(producer, map, &mins))
            } else {
                state.buffer(&read.buffer).map(BufferRegion::full).unwrap_or_else(|| read.clone())
            };
            push_unique(&mut out, rebound);
        }
    }
    out
}

/// Drop the allocation of `buffer` when nothing refers to it any more.
fn remove_dead_alloc(state: &mut ScheduleState, buffer: &str) -> ScheduleResult<()> {
    if is_referenced(state, buffer)? {
        return Ok(());
    }
    for h in state.blocks_post_order() {
        let block = state.block_mut(h)?;
        let before = block.alloc_buffers.len();
        block.alloc_buffers.retain(|b| b.name != buffer);
        if block.alloc_buffers.len() != before {
            trace!("removed dead allocation {} from block \"{}\"", buffer, block.name);
        }
    }
    Ok(())
}

fn check_not_root(state: &ScheduleState, block: Handle, primitive: &str) -> ScheduleResult<BlockNode> {
    let node = state.block(block).map_err(|e| e.during(primitive))?.clone();
    if state.parent(block)?.is_none() {
        return fail(
            ScheduleErrorKind::ComplexBody,
            primitive,
            format!("block \"{}\" is the function root", node.name),
        );
    }
    Ok(node)
}

/// Inline `block` into every consumer and remove it.
pub fn compute_inline(state: &mut ScheduleState, block: Handle) -> ScheduleResult<()> {
    let p = COMPUTE_INLINE;
    let producer = check_not_root(state, block, p)?;
    let store = single_store(&producer, p)?;
    let map = producer_map(&producer, &store, p)?;
    let buffer = store.buffer.clone();
    check_buffer(state, &buffer, &producer.name, p)?;
    let scope = BlockScope::of_block(state, block)?;
    let writers = scope.writers(&buffer).len();
    if writers > 1 {
        return fail(
            ScheduleErrorKind::MultiWriter,
            p,
            format!("buffer {} written by block \"{}\" has {} writers", buffer, producer.name, writers),
        );
    }
    let consumers = scope.consumers(state, block)?;

    for consumer in &consumers {
        rewrite_subtree(state, *consumer, &mut |e| {
            e.replace_loads(&buffer, &mut |indices| {
                store.value.substitute(&bind_producer(&producer, &map, indices))
            })
        })?;
        // nested blocks read the buffer too; their regions follow the loads
        for h in state.blocks_under(*consumer) {
            if !state.block(h)?.reads.iter().any(|r| r.buffer == buffer) {
                continue;
            }
            let reads = inline_read_regions(state, &state.block(h)?.reads, &buffer, &producer, &map);
            let node = state.block_mut(h)?;
            node.reads = reads;
            trace!("inlined {} into block \"{}\"", buffer, node.name);
        }
    }
    remove_block(state, block)?;
    remove_dead_alloc(state, &buffer)
}

/// Fold `block` into its single producer and remove it.
pub fn reverse_compute_inline(state: &mut ScheduleState, block: Handle) -> ScheduleResult<()> {
    let p = REVERSE_COMPUTE_INLINE;
    let consumer = check_not_root(state, block, p)?;
    let cstore = single_store(&consumer, p)?;
    if !consumer.match_buffers.is_empty() || !consumer.alloc_buffers.is_empty() {
        return fail(
            ScheduleErrorKind::ComplexBody,
            p,
            format!("block \"{}\" declares its own buffers", consumer.name),
        );
    }

    let scope = BlockScope::of_block(state, block)?;
    for region in &consumer.reads {
        let writers = scope.writers(&region.buffer).iter().filter(|h| **h != block).count();
        if writers > 1 {
            return fail(
                ScheduleErrorKind::MultiWriter,
                p,
                format!(
                    "buffer {} read by block \"{}\" has {} writers",
                    region.buffer, consumer.name, writers
                ),
            );
        }
    }
    let producers = scope.producers(state, block)?;
    let producer_handle = match producers.as_slice() {
        [h] => *h,
        _ => {
            return fail(
                ScheduleErrorKind::NotSingleProducer,
                p,
                format!("block \"{}\" reads from {} producer blocks, expected 1", consumer.name, producers.len()),
            )
        }
    };
    let producer = state.block(producer_handle)?.clone();
    let pstore = single_store(&producer, p)?;
    let pmap = producer_map(&producer, &pstore, p)?;
    let buffer = pstore.buffer.clone();
    check_buffer(state, &buffer, &producer.name, p)?;
    let readers: Vec<Handle> = scope.readers(&buffer).iter().copied().filter(|h| *h != producer_handle).collect();
    if readers != [block] {
        return fail(
            ScheduleErrorKind::MultiReader,
            p,
            format!("buffer {} of block \"{}\" is read by {} blocks", buffer, producer.name, readers.len()),
        );
    }
    let mut loads: Vec<Vec<Expr>> = cstore.value.loads_of(&buffer);
    for index in &cstore.indices {
        loads.extend(index.loads_of(&buffer));
    }
    if let Some(pred) = &consumer.predicate {
        loads.extend(pred.loads_of(&buffer));
    }
    let load = match loads.first() {
        Some(first) => first.clone(),
        None => {
            return fail(
                ScheduleErrorKind::OpaqueAccess,
                p,
                format!("block \"{}\" reads {} without loading its elements", consumer.name, buffer),
            )
        }
    };
    if loads.iter().any(|l| l.iter().map(Expr::simplify).ne(load.iter().map(Expr::simplify))) {
        return fail(
            ScheduleErrorKind::MultipleLoad,
            p,
            format!("block \"{}\" loads {} at different indices", consumer.name, buffer),
        );
    }

    // consumer point -> buffer element <- producer point
    let domain = consumer.domain();
    let map = match BijectiveMap::analyze(&load, &domain, &pmap.extents()) {
        Ok(map) => map,
        Err(reason) => {
            return fail(
                ScheduleErrorKind::NonAffineAccess,
                p,
                format!("load of {} in block \"{}\": {}", buffer, consumer.name, reason),
            )
        }
    };
    let inverse = map.inverse(&pstore.indices, domain.len());
    let to_producer: HashMap<String, Expr> =
        domain.iter().map(|(v, _)| v.clone()).zip(inverse).collect();

    let rebind = |e: &Expr| {
        e.substitute(&to_producer)
            .replace_loads(&buffer, &mut |_| pstore.value.clone())
            .simplify()
    };
    let new_store = Stmt::store(
        cstore.buffer.clone(),
        cstore.indices.iter().map(|e| rebind(e)).collect(),
        rebind(&cstore.value),
    );
    let mut reads = producer.reads.clone();
    for region in consumer.reads.iter().filter(|r| r.buffer != buffer) {
        push_unique(&mut reads, region.substitute(&to_producer));
    }
    let writes: Vec<BufferRegion> = consumer.writes.iter().map(|r| r.substitute(&to_producer)).collect();
    let predicate = consumer.predicate.as_ref().map(|e| rebind(e));

    let target = state.block_mut(producer_handle)?;
    target.body = vec![Item::Stmt(new_store)];
    target.reads = reads;
    target.writes = writes;
    target.predicate = predicate;
    trace!("folded block \"{}\" into \"{}\"", consumer.name, producer.name);
    remove_block(state, block)?;
    remove_dead_alloc(state, &buffer)
}
