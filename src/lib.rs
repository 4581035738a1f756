//! # Tensched - Tensor Program Scheduling
//!
//! A scheduling engine for block-structured tensor programs, including:
//! - A location index with generation-checked handles into a mutable IR
//! - Producer/consumer and affine index analysis
//! - Forward and reverse compute-inline, loop split and reorder
//! - A replayable trace of every primitive and its decisions
//! - Post-order design-space generation driven by pluggable rules
//!
//! ## Architecture
//!
//! ```text
//! Function → Schedule (state + trace) → Rules × Blocks → Design space
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tensched::prelude::*;
//!
//! let func: Function = tensched::parse_function(&std::fs::read_to_string("fused.json")?)?;
//! let ctx = TuneContext::new("fused").rule(AutoInline::new()).rule(TileSplit::new(vec![16, 32]));
//!
//! for sch in tensched::generate_design_space(&func, &ctx, &SpaceConfig::default())? {
//!     println!("{}\n{}", sch.trace(), sch.func());
//! }
//! ```

#![warn(clippy::all)]

pub mod ir;
pub mod schedule;
pub mod analysis;
pub mod transform;
pub mod space;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ir::{
        grid, BlockBuilder, Buffer, BufferRegion, DataType, Expr, Function, FunctionBuilder, Stmt,
    };
    pub use crate::schedule::{BlockRV, LoopRV, Schedule, Trace};
    pub use crate::space::{
        AutoInline, FnRule, PostOrderApply, ScheduleRule, SpaceConfig, Target, TileSplit,
        TuneContext,
    };
    pub use crate::utils::errors::*;
}

use ir::Function;
use schedule::{BlockRV, Schedule};
use space::{PostOrderApply, SpaceConfig, TuneContext};
use utils::errors::{ScheduleResult, TenschedResult};

/// Read a function from its JSON form.
pub fn parse_function(json: &str) -> TenschedResult<Function> {
    Ok(serde_json::from_str(json)?)
}

/// Generate the design space of `func` with the rules of `context`.
pub fn generate_design_space(
    func: &Function,
    context: &TuneContext,
    config: &SpaceConfig,
) -> TenschedResult<Vec<Schedule>> {
    let mut generator = PostOrderApply::new(config.clone());
    generator.initialize_with_tune_context(context)?;
    generator.generate_design_space(func)
}

/// Inline a producer block into its consumers and remove it.
pub fn forward_inline(sch: &mut Schedule, block: BlockRV) -> ScheduleResult<()> {
    sch.compute_inline(block)
}

/// Fold a consumer block into its single producer and remove it.
pub fn reverse_inline(sch: &mut Schedule, block: BlockRV) -> ScheduleResult<()> {
    sch.reverse_compute_inline(block)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
