//! Hierarchical variable scopes and placeholder substitution.
//!
//! Lookup is local-then-parent. Both `${NAME}` and `%%NAME%%` placeholders
//! are recognized; names may contain dots (`Internal.Step.Name`). A
//! placeholder that no scope defines is left in place unchanged.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};

static BRACE_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("valid brace variable regex")
});

static PERCENT_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%%([A-Za-z_][A-Za-z0-9_.]*)%%").expect("valid percent variable regex")
});

pub const STEP_NAME: &str = "Internal.Step.Name";
pub const STEP_COPY_NR: &str = "Internal.Step.CopyNr";
pub const PIPELINE_NAME: &str = "Internal.Pipeline.Name";

#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    parent: Option<Arc<VariableScope>>,
    local: HashMap<String, String>,
}

impl VariableScope {
    /// Empty root scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Root scope holding the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            parent: None,
            local: std::env::vars().collect(),
        }
    }

    #[must_use]
    pub fn child(parent: &Arc<Self>) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            local: HashMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.local.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.local
            .get(name)
            .map(String::as_str)
            .or_else(|| self.parent.as_deref().and_then(|p| p.get(name)))
    }

    /// Replace every resolvable placeholder in `input`.
    #[must_use]
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains("${") && !input.contains("%%") {
            return input.to_string();
        }
        let resolve = |caps: &Captures<'_>| {
            self.get(&caps[1])
                .map_or_else(|| caps[0].to_string(), str::to_string)
        };
        let braces = BRACE_VAR_RE.replace_all(input, resolve);
        PERCENT_VAR_RE.replace_all(&braces, resolve).into_owned()
    }

    /// Apply [`substitute`](Self::substitute) to every string leaf of `value`.
    #[must_use]
    pub fn substitute_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.substitute(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.substitute_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
