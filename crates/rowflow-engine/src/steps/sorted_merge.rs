//! Sorted merge: k-way merge of individually sorted inputs.
//!
//! One lookahead row is kept per input channel. Each step emits the least
//! lookahead under the key comparator (ties go to the lower input index) and
//! refills it from the same channel. Inputs drop out at end of stream.

use std::cmp::Ordering;
use std::sync::Arc;

use rowflow_types::{Row, RowSchema, StepError, Value};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{Arity, Progress, Step, StepEnv, StepMeta};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Where nulls go within a key column, independent of its direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrdering {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortedMergeConfig {
    pub keys: Vec<SortKey>,
    #[serde(default)]
    pub nulls: NullOrdering,
}

/// Multi-column row comparator over resolved field positions.
#[derive(Debug, Clone)]
pub struct KeyComparator {
    columns: Vec<(usize, SortKey)>,
    nulls: NullOrdering,
}

impl KeyComparator {
    /// Resolve `keys` against `schema`.
    ///
    /// # Errors
    ///
    /// Fails if a key names a field the schema does not have.
    pub fn new(keys: &[SortKey], nulls: NullOrdering, schema: &RowSchema) -> Result<Self, StepError> {
        let columns = keys
            .iter()
            .map(|key| {
                schema
                    .index_of(&key.field)
                    .map(|idx| (idx, key.clone()))
                    .ok_or_else(|| {
                        StepError::schema(
                            "MERGE_KEY_MISSING",
                            format!("key field '{}' not found in {schema}", key.field),
                        )
                        .with_field(key.field.clone())
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { columns, nulls })
    }

    #[must_use]
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (idx, key) in &self.columns {
            let left = a.get(*idx).unwrap_or(&Value::Null);
            let right = b.get(*idx).unwrap_or(&Value::Null);
            let ord = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => self.null_side(),
                (false, true) => self.null_side().reverse(),
                (false, false) => {
                    let ord = left.compare(right, key.case_insensitive);
                    if key.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn null_side(&self) -> Ordering {
        match self.nulls {
            NullOrdering::First => Ordering::Less,
            NullOrdering::Last => Ordering::Greater,
        }
    }
}

impl StepMeta for SortedMergeConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(2)
    }

    fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.keys.is_empty() {
            problems.push("sorted_merge requires at least one key".to_string());
        }
        for key in &self.keys {
            if key.field.trim().is_empty() {
                problems.push("sorted_merge key field must not be empty".to_string());
            }
        }
        problems
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        let Some((first, rest)) = inputs.split_first() else {
            return Err(StepError::schema("NO_INPUT", "sorted_merge has no inputs"));
        };
        for key in &self.keys {
            for (i, input) in inputs.iter().enumerate() {
                let Some(idx) = input.index_of(&key.field) else {
                    return Err(StepError::schema(
                        "MERGE_KEY_MISSING",
                        format!("key field '{}' missing from input {i} {input}", key.field),
                    )
                    .with_field(key.field.clone()));
                };
                let expected = first.index_of(&key.field).and_then(|j| first.field(j));
                let actual = input.field(idx);
                if let (Some(expected), Some(actual)) = (expected, actual) {
                    if expected.field_type != actual.field_type {
                        return Err(StepError::schema(
                            "MERGE_KEY_TYPE",
                            format!(
                                "key field '{}' is {} in input 0 but {} in input {i}",
                                key.field, expected.field_type, actual.field_type
                            ),
                        )
                        .with_field(key.field.clone()));
                    }
                }
            }
        }
        if let Some(other) = rest.iter().find(|s| !s.same_layout(first)) {
            return Err(StepError::schema(
                "MERGE_LAYOUT",
                format!("sorted_merge inputs must share one layout: {first} vs {other}"),
            ));
        }
        Ok(first.as_ref().clone())
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(SortedMerge {
            config: self.clone(),
            comparator: None,
            lookahead: Vec::new(),
            primed: false,
        }))
    }
}

struct SortedMerge {
    config: SortedMergeConfig,
    comparator: Option<KeyComparator>,
    lookahead: Vec<Option<Row>>,
    primed: bool,
}

impl SortedMerge {
    /// Input with the least lookahead row; lowest index wins ties.
    fn least(&self, comparator: &KeyComparator) -> Option<usize> {
        let mut best: Option<(usize, &Row)> = None;
        for (port, row) in self.lookahead.iter().enumerate() {
            let Some(row) = row else { continue };
            best = match best {
                Some((_, current)) if comparator.compare(row, current) != Ordering::Less => best,
                _ => Some((port, row)),
            };
        }
        best.map(|(port, _)| port)
    }
}

impl Step for SortedMerge {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let schema = ctx
            .input_schema(0)
            .ok_or_else(|| StepError::schema("NO_INPUT", "sorted_merge has no inputs"))?;
        self.comparator = Some(KeyComparator::new(
            &self.config.keys,
            self.config.nulls,
            &schema,
        )?);
        self.lookahead = vec![None; ctx.input_count()];
        Ok(())
    }

    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        if !self.primed {
            for port in 0..self.lookahead.len() {
                self.lookahead[port] = ctx.read_row_from(port)?;
            }
            self.primed = true;
        }
        let comparator = self
            .comparator
            .as_ref()
            .ok_or_else(|| StepError::internal("NOT_INITIALIZED", "sorted_merge used before init"))?;

        let Some(port) = self.least(comparator) else {
            return Ok(Progress::Done);
        };
        if let Some(row) = self.lookahead[port].take() {
            ctx.put_row(row)?;
        }
        self.lookahead[port] = ctx.read_row_from(port)?;
        Ok(Progress::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::{FieldMeta, FieldType};

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            FieldMeta::new("group", FieldType::String),
            FieldMeta::new("id", FieldType::Integer),
        ])
        .unwrap()
    }

    fn key(field: &str, ascending: bool) -> SortKey {
        SortKey {
            field: field.into(),
            ascending,
            case_insensitive: false,
        }
    }

    fn row(group: Option<&str>, id: i64) -> Row {
        Row::new(vec![Value::from(group), Value::Integer(id)])
    }

    #[test]
    fn two_keys_break_ties_by_second_direction() {
        let cmp = KeyComparator::new(
            &[key("group", true), key("id", false)],
            NullOrdering::First,
            &schema(),
        )
        .unwrap();
        assert_eq!(cmp.compare(&row(Some("a"), 1), &row(Some("b"), 9)), Ordering::Less);
        assert_eq!(cmp.compare(&row(Some("a"), 1), &row(Some("a"), 9)), Ordering::Greater);
        assert_eq!(cmp.compare(&row(Some("a"), 4), &row(Some("a"), 4)), Ordering::Equal);
    }

    #[test]
    fn nulls_first_by_default_regardless_of_direction() {
        let cmp = KeyComparator::new(&[key("group", false)], NullOrdering::First, &schema()).unwrap();
        assert_eq!(cmp.compare(&row(None, 1), &row(Some("z"), 1)), Ordering::Less);

        let cmp = KeyComparator::new(&[key("group", true)], NullOrdering::Last, &schema()).unwrap();
        assert_eq!(cmp.compare(&row(None, 1), &row(Some("a"), 1)), Ordering::Greater);
    }

    #[test]
    fn missing_key_is_a_schema_error() {
        let err = KeyComparator::new(&[key("nope", true)], NullOrdering::First, &schema()).unwrap_err();
        assert_eq!(err.code, "MERGE_KEY_MISSING");
        assert_eq!(err.field.as_deref(), Some("nope"));
    }

    #[test]
    fn empty_key_list_fails_check() {
        let config = SortedMergeConfig {
            keys: vec![],
            nulls: NullOrdering::First,
        };
        assert_eq!(config.check().len(), 1);
    }

    #[test]
    fn output_schema_rejects_key_type_mismatch() {
        let config = SortedMergeConfig {
            keys: vec![key("id", true)],
            nulls: NullOrdering::First,
        };
        let a = Arc::new(schema());
        let b = Arc::new(
            RowSchema::new(vec![
                FieldMeta::new("group", FieldType::String),
                FieldMeta::new("id", FieldType::String),
            ])
            .unwrap(),
        );
        let err = config.output_schema(&[a.clone(), b]).unwrap_err();
        assert_eq!(err.code, "MERGE_KEY_TYPE");
        assert_eq!(config.output_schema(&[a.clone(), a]).unwrap(), schema());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SortedMergeConfig =
            serde_json::from_value(serde_json::json!({"keys": [{"field": "id"}]})).unwrap();
        assert!(config.keys[0].ascending);
        assert_eq!(config.nulls, NullOrdering::First);
    }
}
