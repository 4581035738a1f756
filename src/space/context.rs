//! Tuning context: target descriptor and the rules available to a task.

use super::rule::ScheduleRule;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque description of the compilation target. Rules may read it, the
/// generator never does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub kind: String,
    pub attrs: BTreeMap<String, String>,
}

impl Target {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attrs: BTreeMap::new() }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (k, v) in &self.attrs {
            write!(f, " -{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Name -> rule mapping consulted for blocks carrying a rule annotation.
#[derive(Clone, Default)]
pub struct CustomRuleRegistry {
    rules: BTreeMap<String, Arc<dyn ScheduleRule>>,
}

impl CustomRuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, rule: Arc<dyn ScheduleRule>) {
        self.rules.insert(name.into(), rule);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScheduleRule>> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn rules(&self) -> impl Iterator<Item = &Arc<dyn ScheduleRule>> {
        self.rules.values()
    }
}

impl fmt::Debug for CustomRuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules.keys()).finish()
    }
}

/// Everything a design-space generator needs besides the function itself.
#[derive(Clone)]
pub struct TuneContext {
    pub task_name: String,
    pub target: Target,
    /// Built-in rules, applied in order to blocks without a custom rule
    pub rules: Vec<Arc<dyn ScheduleRule>>,
    pub custom_rules: CustomRuleRegistry,
}

impl TuneContext {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            target: Target::default(),
            rules: Vec::new(),
            custom_rules: CustomRuleRegistry::new(),
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Append a built-in rule.
    pub fn rule(mut self, rule: impl ScheduleRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Register a custom rule under `name`.
    pub fn custom_rule(mut self, name: impl Into<String>, rule: impl ScheduleRule + 'static) -> Self {
        self.custom_rules.register(name, Arc::new(rule));
        self
    }
}

impl fmt::Debug for TuneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuneContext")
            .field("task_name", &self.task_name)
            .field("target", &self.target)
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("custom_rules", &self.custom_rules)
            .finish()
    }
}
