//! Rule-based row validation.
//!
//! Rows failing one or more rules are rejected with one error per failed
//! rule; with an error hop they are redirected, otherwise the first failure
//! fails the step.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use rowflow_types::{Row, RowSchema, StepError, Value};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateConfig {
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    NotNull { assert_not_null: FieldSelector },
    Regex { assert_regex: RegexSelector },
    Range { assert_range: RangeSelector },
    Unique { assert_unique: FieldSelector },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldSelector {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegexSelector {
    One(RegexRule),
    Many(Vec<RegexRule>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegexRule {
    pub field: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RangeSelector {
    One(RangeRule),
    Many(Vec<RangeRule>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeRule {
    pub field: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone)]
enum CompiledRule {
    NotNull { field: String },
    Regex { field: String, pattern: String, regex: Regex },
    Range { field: String, min: Option<f64>, max: Option<f64> },
    Unique { field: String },
}

impl CompiledRule {
    fn field(&self) -> &str {
        match self {
            Self::NotNull { field }
            | Self::Regex { field, .. }
            | Self::Range { field, .. }
            | Self::Unique { field } => field,
        }
    }
}

impl FieldSelector {
    fn fields(&self) -> Vec<&str> {
        match self {
            Self::One(field) => vec![field.as_str()],
            Self::Many(fields) => fields.iter().map(String::as_str).collect(),
        }
    }
}

impl RegexSelector {
    fn rules(&self) -> Vec<(&str, &str)> {
        match self {
            Self::One(rule) => vec![(rule.field.as_str(), rule.pattern.as_str())],
            Self::Many(rules) => rules
                .iter()
                .map(|r| (r.field.as_str(), r.pattern.as_str()))
                .collect(),
            Self::Map(map) => map.iter().map(|(f, p)| (f.as_str(), p.as_str())).collect(),
        }
    }
}

impl RangeSelector {
    fn rules(&self) -> Vec<&RangeRule> {
        match self {
            Self::One(rule) => vec![rule],
            Self::Many(rules) => rules.iter().collect(),
        }
    }
}

impl ValidateConfig {
    fn compile(&self) -> Result<Vec<CompiledRule>, String> {
        if self.rules.is_empty() {
            return Err("rules must not be empty".to_string());
        }
        let mut compiled = Vec::new();
        for rule in &self.rules {
            match rule {
                RuleSpec::NotNull { assert_not_null } => {
                    for field in assert_not_null.fields() {
                        compiled.push(CompiledRule::NotNull { field: field.to_string() });
                    }
                }
                RuleSpec::Unique { assert_unique } => {
                    for field in assert_unique.fields() {
                        compiled.push(CompiledRule::Unique { field: field.to_string() });
                    }
                }
                RuleSpec::Regex { assert_regex } => {
                    for (field, pattern) in assert_regex.rules() {
                        let regex = Regex::new(pattern)
                            .map_err(|e| format!("invalid regex pattern for field '{field}': {e}"))?;
                        compiled.push(CompiledRule::Regex {
                            field: field.to_string(),
                            pattern: pattern.to_string(),
                            regex,
                        });
                    }
                }
                RuleSpec::Range { assert_range } => {
                    for rule in assert_range.rules() {
                        match (rule.min, rule.max) {
                            (None, None) => {
                                return Err(format!(
                                    "range rule for field '{}' must set min and/or max",
                                    rule.field
                                ));
                            }
                            (Some(min), Some(max)) if min > max => {
                                return Err(format!(
                                    "range rule for field '{}' has min > max ({min} > {max})",
                                    rule.field
                                ));
                            }
                            _ => {}
                        }
                        compiled.push(CompiledRule::Range {
                            field: rule.field.clone(),
                            min: rule.min,
                            max: rule.max,
                        });
                    }
                }
            }
        }
        if let Some(rule) = compiled.iter().find(|r| r.field().trim().is_empty()) {
            return Err(format!("rule {rule:?} has an empty field name"));
        }
        Ok(compiled)
    }
}

impl StepMeta for ValidateConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn check(&self) -> Vec<String> {
        self.compile().err().into_iter().collect()
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        let layout = common_layout(inputs)?;
        let rules = self
            .compile()
            .map_err(|e| StepError::config("INVALID_RULES", e))?;
        for rule in &rules {
            if layout.index_of(rule.field()).is_none() {
                return Err(StepError::schema(
                    "VALIDATE_FIELD",
                    format!("rule field '{}' not found in {layout}", rule.field()),
                )
                .with_field(rule.field().to_string()));
            }
        }
        Ok(layout)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        let rules = self
            .compile()
            .map_err(|e| StepError::config("INVALID_RULES", e))?;
        Ok(Box::new(Validate {
            rules: rules.into_iter().map(|r| (0, r)).collect(),
            seen: BTreeMap::new(),
        }))
    }
}

struct Validate {
    rules: Vec<(usize, CompiledRule)>,
    seen: BTreeMap<usize, HashSet<String>>,
}

impl Validate {
    fn evaluate(&mut self, row: &Row) -> Vec<StepError> {
        let mut failures = Vec::new();
        for (idx, rule) in &self.rules {
            let value = row.get(*idx).unwrap_or(&Value::Null);
            let failure = match rule {
                CompiledRule::NotNull { field } => value.is_null().then(|| {
                    StepError::data("NOT_NULL", format!("assert_not_null({field}) failed: value is null"))
                }),
                CompiledRule::Regex { field, pattern, regex } => match value {
                    Value::Null => Some(StepError::data(
                        "REGEX",
                        format!("assert_regex({field}, {pattern}) failed: value is null"),
                    )),
                    Value::String(s) if regex.is_match(s) => None,
                    Value::String(s) => Some(StepError::data(
                        "REGEX",
                        format!("assert_regex({field}, {pattern}) failed: value '{s}' does not match"),
                    )),
                    _ => Some(StepError::data(
                        "REGEX",
                        format!("assert_regex({field}, {pattern}) failed: field is not string"),
                    )),
                },
                CompiledRule::Range { field, min, max } => match value.as_f64() {
                    _ if value.is_null() => Some(StepError::data(
                        "RANGE",
                        format!("assert_range({field}) failed: value is null"),
                    )),
                    Some(v) if !v.is_finite() => Some(StepError::data(
                        "RANGE",
                        format!("assert_range({field}) failed: value is non-finite number"),
                    )),
                    Some(v) if min.is_some_and(|lo| v < lo) || max.is_some_and(|hi| v > hi) => {
                        Some(StepError::data(
                            "RANGE",
                            format!(
                                "assert_range({field}) failed: value {v} outside bounds [{min:?}, {max:?}]"
                            ),
                        ))
                    }
                    Some(_) => None,
                    None => Some(StepError::data(
                        "RANGE",
                        format!("assert_range({field}) failed: field is not numeric"),
                    )),
                },
                CompiledRule::Unique { field } => {
                    let key = value.to_json().to_string();
                    let seen = self.seen.entry(*idx).or_default();
                    (!seen.insert(key)).then(|| {
                        StepError::data(
                            "UNIQUE",
                            format!("assert_unique({field}) failed: duplicate value {value}"),
                        )
                    })
                }
            };
            if let Some(err) = failure {
                failures.push(err.with_field(rule.field().to_string()));
            }
        }
        failures
    }
}

impl Step for Validate {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let schema = ctx
            .input_schema(0)
            .ok_or_else(|| StepError::schema("NO_INPUT", "validate has no inputs"))?;
        for (idx, rule) in &mut self.rules {
            *idx = schema.require(rule.field())?;
        }
        Ok(())
    }

    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(row) = ctx.read_row()? else {
            return Ok(Progress::Done);
        };
        let failures = self.evaluate(&row);
        if failures.is_empty() {
            ctx.put_row(row)?;
        } else {
            ctx.reject(row, failures)?;
        }
        Ok(Progress::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiled(rules: serde_json::Value) -> Validate {
        let config: ValidateConfig = serde_json::from_value(json!({ "rules": rules })).unwrap();
        Validate {
            rules: config
                .compile()
                .unwrap()
                .into_iter()
                .enumerate()
                .map(|(i, r)| (i, r))
                .collect(),
            seen: BTreeMap::new(),
        }
    }

    #[test]
    fn compile_supports_repeat_and_shorthand_forms() {
        let config: ValidateConfig = serde_json::from_value(json!({
            "rules": [
                { "assert_not_null": "user_id" },
                { "assert_not_null": ["email", "account_id"] },
                { "assert_regex": { "email": "^.+@.+$", "phone": "^[0-9-]+$" } },
                { "assert_range": [
                    { "field": "age", "min": 0, "max": 150 },
                    { "field": "score", "min": 0 }
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(config.compile().unwrap().len(), 7);
    }

    #[test]
    fn compile_rejects_invalid_regex_and_bounds() {
        let regex_bad: ValidateConfig = serde_json::from_value(json!({
            "rules": [{ "assert_regex": { "field": "email", "pattern": "(" } }]
        }))
        .unwrap();
        assert_eq!(regex_bad.check().len(), 1);

        let bounds_bad: ValidateConfig = serde_json::from_value(json!({
            "rules": [{ "assert_range": { "field": "age", "min": 10, "max": 1 } }]
        }))
        .unwrap();
        assert!(bounds_bad.compile().is_err());
    }

    #[test]
    fn evaluate_collects_every_failed_rule() {
        // columns: 0 = id (not null), 1 = email (regex), 2 = age (range)
        let mut v = compiled(json!([
            { "assert_not_null": "id" },
            { "assert_regex": { "field": "email", "pattern": "^.+@.+$" } },
            { "assert_range": { "field": "age", "max": 150 } }
        ]));
        let ok = Row::new(vec![Value::Integer(1), Value::from("a@b"), Value::Integer(30)]);
        assert!(v.evaluate(&ok).is_empty());

        let bad = Row::new(vec![Value::Null, Value::from("nope"), Value::Integer(200)]);
        let failures = v.evaluate(&bad);
        let codes: Vec<&str> = failures.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["NOT_NULL", "REGEX", "RANGE"]);
        assert!(failures.iter().all(StepError::is_row_level));
        assert_eq!(failures[1].field.as_deref(), Some("email"));
    }

    #[test]
    fn unique_flags_repeats_after_first_occurrence() {
        let mut v = compiled(json!([{ "assert_unique": "id" }]));
        let row = Row::new(vec![Value::Integer(7)]);
        assert!(v.evaluate(&row).is_empty());
        assert_eq!(v.evaluate(&row).len(), 1);
    }
}
