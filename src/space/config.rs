//! Design-space generation configuration

/// Annotation key that selects a custom rule for a block.
pub const DEFAULT_RULE_ANNOTATION_KEY: &str = "schedule_rule";

/// Configuration for [`PostOrderApply`](super::PostOrderApply)
#[derive(Clone, Debug)]
pub struct SpaceConfig {
    /// Block annotation naming a custom rule
    pub rule_annotation_key: String,

    /// Expand the frontier in parallel (needs the `parallel` feature)
    pub parallel: bool,

    /// Verify every generated schedule before returning it
    pub debug_verify: bool,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            rule_annotation_key: DEFAULT_RULE_ANNOTATION_KEY.to_string(),
            parallel: false,
            debug_verify: false,
        }
    }
}

impl SpaceConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the annotation key used for custom rule dispatch
    pub fn rule_annotation_key(mut self, key: impl Into<String>) -> Self {
        self.rule_annotation_key = key.into();
        self
    }

    /// Enable or disable parallel frontier expansion
    pub fn parallel(mut self, enable: bool) -> Self {
        self.parallel = enable;
        self
    }

    /// Enable or disable debug verification
    pub fn debug_verify(mut self, enable: bool) -> Self {
        self.debug_verify = enable;
        self
    }

    /// Whether parallel expansion will actually be used
    pub fn use_parallel(&self) -> bool {
        self.parallel && cfg!(feature = "parallel")
    }
}
