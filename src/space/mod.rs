//! Design-space generation
//!
//! Builds the set of candidate schedules of a function by walking its
//! blocks in post order and letting pluggable [`ScheduleRule`]s rewrite
//! each one.
//!
//! # Example
//!
//! ```ignore
//! use tensched::space::{AutoInline, PostOrderApply, SpaceConfig, TileSplit, TuneContext};
//!
//! let ctx = TuneContext::new("matmul")
//!     .rule(AutoInline::new())
//!     .rule(TileSplit::new(vec![16, 32]));
//!
//! let mut generator = PostOrderApply::new(SpaceConfig::default());
//! generator.initialize_with_tune_context(&ctx)?;
//! for sch in generator.generate_design_space(&func)? {
//!     println!("{}", sch.trace());
//! }
//! ```

mod config;
mod context;
mod post_order;
mod rule;

pub use config::{SpaceConfig, DEFAULT_RULE_ANNOTATION_KEY};
pub use context::{CustomRuleRegistry, Target, TuneContext};
pub use post_order::{PostOrderApply, NO_RULE};
pub use rule::{AutoInline, FnRule, ScheduleRule, TileSplit};
