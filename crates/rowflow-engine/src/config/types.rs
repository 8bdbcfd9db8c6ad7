//! Pipeline YAML configuration types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    /// Pipeline-scope variables, layered over the process environment.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

impl PipelineConfig {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Pipeline variables rendered as strings (scalars lose their quotes).
    #[must_use]
    pub fn variable_values(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }

    /// Whether `hop` is the error hop of its source step.
    #[must_use]
    pub fn is_error_hop(&self, hop: &HopConfig) -> bool {
        self.step(&hop.from)
            .and_then(|s| s.error_handling.as_ref())
            .is_some_and(|eh| eh.target == hop.to)
    }
}

/// Runtime resource knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Rows buffered per channel before the producer blocks.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Publish a metrics snapshot every N rows processed by a copy.
    #[serde(default = "default_feedback_rows")]
    pub feedback_rows: u64,
    /// Publish a metrics snapshot at least this often while rows flow.
    #[serde(default = "default_feedback_interval_ms")]
    pub feedback_interval_ms: u64,
}

fn default_channel_capacity() -> usize {
    200
}
fn default_feedback_rows() -> u64 {
    5_000
}
fn default_feedback_interval_ms() -> u64 {
    1_000
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            feedback_rows: default_feedback_rows(),
            feedback_interval_ms: default_feedback_interval_ms(),
        }
    }
}

/// One logical step. Kind-specific settings stay in `params` and are bound
/// to a typed step configuration after variable substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub copies: Copies,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandlingConfig>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl StepConfig {
    /// Kind plus kind-specific parameters, as one JSON object.
    #[must_use]
    pub fn settings(&self) -> serde_json::Value {
        let mut map = self.params.clone();
        map.insert("kind".into(), serde_json::Value::String(self.kind.clone()));
        serde_json::Value::Object(map)
    }
}

/// Number of parallel copies: a literal or a placeholder resolved at prepare time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Copies {
    Count(u32),
    Expr(String),
}

impl Default for Copies {
    fn default() -> Self {
        Self::Count(1)
    }
}

/// How a step spreads rows over its output channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Each row goes to the next output lane in turn.
    #[default]
    RoundRobin,
    /// Every row goes to every output lane.
    Copy,
}

/// Error-row redirection for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Step receiving the error rows; a hop `from -> target` must exist.
    pub target: String,
    #[serde(default)]
    pub max_errors: Option<u64>,
    #[serde(default)]
    pub max_percent_errors: Option<u32>,
    #[serde(default)]
    pub min_rows_for_percent: u64,
    /// Whether redirected rows count toward the step's error total.
    #[serde(default)]
    pub count_as_errors: bool,
    #[serde(default)]
    pub fields: ErrorFieldNames,
}

/// Names of the diagnostic fields appended to error rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFieldNames {
    #[serde(default = "default_count_field")]
    pub count: String,
    #[serde(default = "default_description_field")]
    pub description: String,
    #[serde(default = "default_field_field")]
    pub field: String,
    #[serde(default = "default_code_field")]
    pub code: String,
}

fn default_count_field() -> String {
    "error_count".to_string()
}
fn default_description_field() -> String {
    "error_description".to_string()
}
fn default_field_field() -> String {
    "error_field".to_string()
}
fn default_code_field() -> String {
    "error_code".to_string()
}

impl Default for ErrorFieldNames {
    fn default() -> Self {
        Self {
            count: default_count_field(),
            description: default_description_field(),
            field: default_field_field(),
            code: default_code_field(),
        }
    }
}

/// Directed edge between two steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Hash partitioning of a hop across the target step's copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub field: String,
}
