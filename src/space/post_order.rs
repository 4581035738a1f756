//! Post-order design-space generation.
//!
//! Blocks are visited children first. For every block, each schedule of the
//! frontier is handed to the block's rules in turn and replaced by the
//! candidates they return, so the final frontier holds every combination of
//! per-block choices. A block that an earlier rule removed from a schedule is
//! skipped for that schedule.

use super::config::SpaceConfig;
use super::context::TuneContext;
use super::rule::ScheduleRule;
use crate::analysis::verify;
use crate::ir::stmt::Function;
use crate::schedule::{BlockRV, Schedule};
use crate::utils::errors::{
    RuleError, ScheduleError, ScheduleErrorKind, TenschedError, TenschedResult,
};
use log::{info, trace, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Annotation value that disables every rule on a block.
pub const NO_RULE: &str = "None";

/// Generates the design space of a function by applying rules to its
/// blocks in post order.
#[derive(Debug, Clone)]
pub struct PostOrderApply {
    config: SpaceConfig,
    context: TuneContext,
}

impl Default for PostOrderApply {
    fn default() -> Self {
        Self::new(SpaceConfig::default())
    }
}

impl PostOrderApply {
    /// A generator with no rules until a context is installed.
    pub fn new(config: SpaceConfig) -> Self {
        Self { config, context: TuneContext::new("") }
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn context(&self) -> &TuneContext {
        &self.context
    }

    /// Install `context` and initialize every rule it carries.
    pub fn initialize_with_tune_context(&mut self, context: &TuneContext) -> TenschedResult<()> {
        for rule in context.rules.iter().chain(context.custom_rules.rules()) {
            rule.initialize_with_tune_context(context)
                .map_err(|source| TenschedError::RuleInit { rule: rule.name().to_string(), source })?;
        }
        self.context = context.clone();
        Ok(())
    }

    /// Generate every candidate schedule of `func`, in a deterministic order.
    ///
    /// Fails before any rule runs if two blocks share a name. A failing rule
    /// aborts generation; no partial space is returned.
    pub fn generate_design_space(&self, func: &Function) -> TenschedResult<Vec<Schedule>> {
        check_unique_names(func)?;

        let mut seed = Schedule::new(func);
        let order: Vec<String> = seed
            .state()
            .blocks_post_order()
            .into_iter()
            .map(|h| seed.state().block(h).map(|b| b.name.clone()))
            .collect::<Result<_, _>>()?;
        let mut blocks = Vec::with_capacity(order.len());
        for name in order {
            let block = seed.get_block(&name)?;
            self.warn_unregistered(&seed, block, &name);
            blocks.push((name, block));
        }

        let mut frontier = vec![seed];
        for (name, block) in &blocks {
            let before = frontier.len();
            let expanded = self.expand_frontier(frontier, name, *block)?;
            frontier = expanded.into_iter().flatten().collect();
            trace!("block \"{}\": {} -> {} schedule(s)", name, before, frontier.len());
        }

        info!(
            "task \"{}\": {} schedule(s) from {} block(s) of \"{}\"{}",
            self.context.task_name,
            frontier.len(),
            blocks.len(),
            func.name,
            if self.config.use_parallel() { " (parallel)" } else { "" }
        );
        Ok(frontier)
    }

    #[cfg(feature = "parallel")]
    fn expand_frontier(
        &self,
        frontier: Vec<Schedule>,
        name: &str,
        block: BlockRV,
    ) -> TenschedResult<Vec<Vec<Schedule>>> {
        use rayon::prelude::*;

        if self.config.parallel {
            return frontier
                .into_par_iter()
                .map(|sch| self.expand_schedule(sch, name, block))
                .collect();
        }
        frontier.into_iter().map(|sch| self.expand_schedule(sch, name, block)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn expand_frontier(
        &self,
        frontier: Vec<Schedule>,
        name: &str,
        block: BlockRV,
    ) -> TenschedResult<Vec<Vec<Schedule>>> {
        frontier.into_iter().map(|sch| self.expand_schedule(sch, name, block)).collect()
    }

    /// Run the block's rules on one schedule. Each rule expands the
    /// candidates of the previous one; liveness is checked before each call.
    fn expand_schedule(&self, sch: Schedule, name: &str, block: BlockRV) -> TenschedResult<Vec<Schedule>> {
        if !sch.contains(block) {
            trace!("block \"{}\" already removed, skipped", name);
            return Ok(vec![sch]);
        }
        let rules = self.rules_for(&sch, block);
        let mut current = vec![sch];
        for rule in &rules {
            let mut next = Vec::with_capacity(current.len());
            for sch in current {
                if !sch.contains(block) {
                    next.push(sch);
                    continue;
                }
                let candidates = rule.apply(sch, block).map_err(|source| RuleError {
                    rule: rule.name().to_string(),
                    block: name.to_string(),
                    source,
                })?;
                if candidates.is_empty() {
                    return Err(RuleError {
                        rule: rule.name().to_string(),
                        block: name.to_string(),
                        source: anyhow::anyhow!("no candidate schedule returned"),
                    }
                    .into());
                }
                if self.config.debug_verify {
                    for candidate in &candidates {
                        verify(candidate.state()).map_err(|e| {
                            TenschedError::Verify(format!(
                                "after rule `{}` on block \"{}\": {}",
                                rule.name(),
                                name,
                                e
                            ))
                        })?;
                    }
                }
                next.extend(candidates);
            }
            current = next;
        }
        Ok(current)
    }

    /// The rules that apply to `block` in `sch`: the custom rule named by
    /// its annotation if registered, else the built-in list.
    fn rules_for(&self, sch: &Schedule, block: BlockRV) -> Vec<Arc<dyn ScheduleRule>> {
        match sch.annotation(block, &self.config.rule_annotation_key) {
            Ok(Some(NO_RULE)) => Vec::new(),
            Ok(Some(rule_name)) => match self.context.custom_rules.get(rule_name) {
                Some(rule) => vec![rule.clone()],
                None => self.context.rules.clone(),
            },
            _ => self.context.rules.clone(),
        }
    }

    fn warn_unregistered(&self, sch: &Schedule, block: BlockRV, name: &str) {
        if let Ok(Some(rule_name)) = sch.annotation(block, &self.config.rule_annotation_key) {
            if rule_name != NO_RULE && !self.context.custom_rules.contains(rule_name) {
                warn!(
                    "block \"{}\" asks for rule \"{}\", which is not registered; using built-in rules",
                    name, rule_name
                );
            }
        }
    }
}

fn check_unique_names(func: &Function) -> TenschedResult<()> {
    let mut seen = HashSet::new();
    for name in func.block_names() {
        if !seen.insert(name.clone()) {
            return Err(ScheduleError::new(
                ScheduleErrorKind::DuplicateBlockName,
                "generate_design_space",
                format!("duplicated block name \"{}\" in function \"{}\" is not supported", name, func.name),
            )
            .into());
        }
    }
    Ok(())
}
