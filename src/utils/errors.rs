//! Error types for the scheduling engine.
//!
//! Schedule primitives fail with [`ScheduleError`], whose kind belongs to one
//! of two categories (validation or identity). Failures coming out of a rule
//! callback are wrapped in [`RuleError`]. Both convert into [`TenschedError`].

use thiserror::Error;
use std::fmt;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum TenschedError {
    /// A schedule primitive rejected its input
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// A schedule rule failed during design-space generation
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// A schedule rule could not be initialized with the tuning context
    #[error("Rule `{rule}` failed to initialize: {source}")]
    RuleInit {
        rule: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed JSON input
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generated schedule failed debug verification
    #[error("Verification failed: {0}")]
    Verify(String),
}

/// Error raised by a schedule primitive.
///
/// A primitive that returns this error has left the schedule untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleError {
    /// The error message, naming the offending block, loop or buffer
    pub message: String,
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
    /// The primitive that failed
    pub primitive: String,
}

impl ScheduleError {
    pub fn new(kind: ScheduleErrorKind, primitive: &str, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind, primitive: primitive.to_string() }
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Attribute the error to `primitive`.
    pub fn during(mut self, primitive: &str) -> Self {
        self.primitive = primitive.to_string();
        self
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.primitive)
    }
}

/// Broad class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The IR does not satisfy a primitive's preconditions
    Validation,
    /// A name or handle does not identify exactly one live node
    Identity,
    /// A rule callback failed
    Rule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleErrorKind {
    /// A buffer has more than one writer, or a block writes more than one buffer
    MultiWriter,
    /// The producer's buffer is read by more than one block
    MultiReader,
    /// The consumer does not read from exactly one producer block
    NotSingleProducer,
    /// The buffer is accessed through an opaque pointer
    OpaqueAccess,
    /// A block declares a sub-view of the buffer
    BufferAlias,
    /// A load index is not a bijective affine map of the iteration variables
    NonAffineAccess,
    /// Loads of the same buffer differ
    MultipleLoad,
    /// The block carries a reduction
    ReductionInline,
    /// The buffer is a function parameter
    OutputBlock,
    /// The block body is not a single store
    ComplexBody,
    /// Split factors do not multiply to the loop extent
    FactorMismatch,
    /// Loops passed to reorder are not a single nest
    NotLoopChain,
    /// Two live blocks share a name
    DuplicateBlockName,
    /// The handle refers to a removed node
    StaleHandle,
    /// No block has the requested name
    NotFound,
}

impl ScheduleErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScheduleErrorKind::DuplicateBlockName
            | ScheduleErrorKind::StaleHandle
            | ScheduleErrorKind::NotFound => ErrorCategory::Identity,
            _ => ErrorCategory::Validation,
        }
    }
}

/// Failure of a schedule rule on one block.
#[derive(Error, Debug)]
#[error("rule `{rule}` failed on block \"{block}\": {source}")]
pub struct RuleError {
    /// Name of the rule
    pub rule: String,
    /// Name of the block being scheduled
    pub block: String,
    #[source]
    pub source: anyhow::Error,
}

impl RuleError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Rule
    }
}

/// Result type using TenschedError.
pub type TenschedResult<T> = Result<T, TenschedError>;

/// Result type of schedule primitives.
pub type ScheduleResult<T> = Result<T, ScheduleError>;
