//! Data grid source: declared fields plus literal rows.

use std::collections::VecDeque;
use std::sync::Arc;

use rowflow_types::{FieldMeta, Row, RowSchema, StepError, Value};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct RowsConfig {
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowsConfig {
    fn convert(&self) -> Result<Vec<Row>, StepError> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, literals)| {
                if literals.len() != self.fields.len() {
                    return Err(StepError::config(
                        "ROW_WIDTH",
                        format!(
                            "row {i} has {} values but {} fields are declared",
                            literals.len(),
                            self.fields.len()
                        ),
                    ));
                }
                literals
                    .iter()
                    .zip(&self.fields)
                    .map(|(literal, field)| {
                        Value::from_json(literal, field.field_type).map_err(|e| {
                            StepError::config("ROW_VALUE", format!("row {i}: {e}"))
                                .with_field(field.name.clone())
                        })
                    })
                    .collect::<Result<Row, _>>()
            })
            .collect()
    }
}

impl StepMeta for RowsConfig {
    fn input_arity(&self) -> Arity {
        Arity::None
    }

    fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.fields.is_empty() {
            problems.push("rows requires at least one field".to_string());
        }
        if let Err(e) = RowSchema::new(self.fields.clone()) {
            problems.push(e.to_string());
        }
        if let Err(e) = self.convert() {
            problems.push(e.message);
        }
        problems
    }

    fn output_schema(&self, _inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        Ok(RowSchema::new(self.fields.clone())?)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(RowsStep {
            pending: self.convert()?.into(),
        }))
    }
}

struct RowsStep {
    pending: VecDeque<Row>,
}

impl Step for RowsStep {
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(row) = self.pending.pop_front() else {
            return Ok(Progress::Done);
        };
        ctx.add_lines_input(1);
        ctx.put_row(row)?;
        Ok(Progress::Continue)
    }
}
