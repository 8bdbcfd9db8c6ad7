//! Appends constant-valued fields to every row.

use std::sync::Arc;

use rowflow_types::{FieldMeta, FieldType, RowSchema, StepError, Value};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct ConstantField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddConstantsConfig {
    pub fields: Vec<ConstantField>,
}

impl AddConstantsConfig {
    fn values(&self) -> Result<Vec<Value>, StepError> {
        self.fields
            .iter()
            .map(|f| {
                Value::from_json(&f.value, f.field_type)
                    .map_err(|e| StepError::config("CONSTANT_VALUE", e.to_string()).with_field(f.name.clone()))
            })
            .collect()
    }
}

impl StepMeta for AddConstantsConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.fields.is_empty() {
            problems.push("add_constants requires at least one field".to_string());
        }
        if let Err(e) = self.values() {
            problems.push(format!("{}: {}", e.field.unwrap_or_default(), e.message));
        }
        problems
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        let base = common_layout(inputs)?;
        Ok(base.extended(
            self.fields
                .iter()
                .map(|f| FieldMeta::new(f.name.clone(), f.field_type)),
        )?)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(AddConstants {
            values: self.values()?,
        }))
    }
}

struct AddConstants {
    values: Vec<Value>,
}

impl Step for AddConstants {
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(mut row) = ctx.read_row()? else {
            return Ok(Progress::Done);
        };
        row.extend(self.values.iter().cloned());
        ctx.put_row(row)?;
        Ok(Progress::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_schema_appends_fields() {
        let config: AddConstantsConfig = serde_json::from_value(json!({
            "fields": [{"name": "region", "type": "string", "value": "eu"}]
        }))
        .unwrap();
        let input = Arc::new(RowSchema::new(vec![FieldMeta::new("id", FieldType::Integer)]).unwrap());
        let out = config.output_schema(&[input]).unwrap();
        assert_eq!(out.names().collect::<Vec<_>>(), vec!["id", "region"]);
    }

    #[test]
    fn name_clash_is_a_schema_error() {
        let config: AddConstantsConfig = serde_json::from_value(json!({
            "fields": [{"name": "id", "type": "integer", "value": 1}]
        }))
        .unwrap();
        let input = Arc::new(RowSchema::new(vec![FieldMeta::new("id", FieldType::Integer)]).unwrap());
        assert!(config.output_schema(&[input]).is_err());
    }

    #[test]
    fn bad_constant_fails_check() {
        let config: AddConstantsConfig = serde_json::from_value(json!({
            "fields": [{"name": "n", "type": "integer", "value": "abc"}]
        }))
        .unwrap();
        let problems = config.check();
        assert!(problems[0].starts_with("n: cannot convert"));
    }
}
