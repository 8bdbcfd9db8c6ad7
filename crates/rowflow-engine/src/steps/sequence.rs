//! Integer sequence generator source.

use std::sync::Arc;
use std::time::Duration;

use rowflow_types::{FieldMeta, FieldType, Row, RowSchema, StepError, Value};
use serde::Deserialize;

use crate::config::lenient;
use crate::context::StepContext;
use crate::step::{Arity, Progress, Step, StepEnv, StepMeta};

fn default_field() -> String {
    "id".to_string()
}

fn default_one() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    #[serde(default = "default_field")]
    pub field: String,
    #[serde(default = "default_one", deserialize_with = "lenient::number")]
    pub start: i64,
    #[serde(default = "default_one", deserialize_with = "lenient::number")]
    pub increment: i64,
    /// Rows to generate; unbounded when absent (stop it with safe stop).
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub limit: Option<u64>,
    /// Pause before each row.
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub delay_ms: Option<u64>,
}

impl StepMeta for SequenceConfig {
    fn input_arity(&self) -> Arity {
        Arity::None
    }

    fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.field.trim().is_empty() {
            problems.push("sequence field must not be empty".to_string());
        }
        if self.increment == 0 {
            problems.push("sequence increment must not be 0".to_string());
        }
        problems
    }

    fn output_schema(&self, _inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        Ok(RowSchema::new(vec![FieldMeta::new(
            self.field.clone(),
            FieldType::Integer,
        )])?)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(Sequence {
            next: Some(self.start),
            increment: self.increment,
            remaining: self.limit,
            delay: self.delay_ms.map(Duration::from_millis),
            emitted: 0,
        }))
    }
}

struct Sequence {
    /// `None` once the sequence stepped past `i64` bounds.
    next: Option<i64>,
    increment: i64,
    remaining: Option<u64>,
    delay: Option<Duration>,
    emitted: u64,
}

impl Step for Sequence {
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        if self.remaining == Some(0) {
            return Ok(Progress::Done);
        }
        if let Some(delay) = self.delay {
            if !ctx.sleep(delay) {
                return Ok(Progress::Done);
            }
        }
        let Some(value) = self.next else {
            return Err(StepError::data(
                "SEQUENCE_OVERFLOW",
                format!("sequence overflowed after {} rows", self.emitted),
            )
            .with_scope(rowflow_types::ErrorScope::Step));
        };
        self.next = value.checked_add(self.increment);
        self.emitted += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        ctx.add_lines_input(1);
        ctx.put_row(Row::new(vec![Value::Integer(value)]))?;
        Ok(Progress::Continue)
    }
}
