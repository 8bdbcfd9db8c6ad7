//! Runtime execution options (not part of pipeline YAML config).

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Variable overrides layered over the pipeline's `variables` map.
    pub variables: BTreeMap<String, String>,
    /// Caps rows captured by every preview step, if set.
    pub preview_limit: Option<usize>,
    /// Overrides `resources.channel_capacity`, if set.
    pub channel_capacity: Option<usize>,
}

impl ExecutionOptions {
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}
