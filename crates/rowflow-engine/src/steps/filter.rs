//! Keeps rows whose field compares true against a literal.

use std::cmp::Ordering;
use std::sync::Arc;

use rowflow_types::{RowSchema, StepError, Value};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    fn needs_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl StepMeta for FilterConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.field.trim().is_empty() {
            problems.push("filter field must not be empty".to_string());
        }
        if self.op.needs_value() && self.value.is_null() {
            problems.push(format!("filter op {:?} requires a value", self.op));
        }
        problems
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        let layout = common_layout(inputs)?;
        let idx = layout.require(&self.field).map_err(|e| {
            StepError::schema("FILTER_FIELD", e.to_string()).with_field(self.field.clone())
        })?;
        if self.op.needs_value() {
            if let Some(field) = layout.field(idx) {
                Value::from_json(&self.value, field.field_type).map_err(|e| {
                    StepError::config("FILTER_VALUE", e.to_string()).with_field(self.field.clone())
                })?;
            }
        }
        Ok(layout)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(Filter {
            config: self.clone(),
            index: 0,
            literal: Value::Null,
        }))
    }
}

struct Filter {
    config: FilterConfig,
    index: usize,
    literal: Value,
}

impl Filter {
    fn keep(&self, value: &Value) -> bool {
        let ord = || value.compare(&self.literal, self.config.case_insensitive);
        match self.config.op {
            FilterOp::IsNull => value.is_null(),
            FilterOp::IsNotNull => !value.is_null(),
            _ if value.is_null() => false,
            FilterOp::Eq => ord() == Ordering::Equal,
            FilterOp::Ne => ord() != Ordering::Equal,
            FilterOp::Lt => ord() == Ordering::Less,
            FilterOp::Le => ord() != Ordering::Greater,
            FilterOp::Gt => ord() == Ordering::Greater,
            FilterOp::Ge => ord() != Ordering::Less,
        }
    }
}

impl Step for Filter {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let schema = ctx
            .input_schema(0)
            .ok_or_else(|| StepError::schema("NO_INPUT", "filter has no inputs"))?;
        self.index = schema
            .require(&self.config.field)
            .map_err(|e| StepError::schema("FILTER_FIELD", e.to_string()))?;
        if self.config.op.needs_value() {
            let ty = schema
                .field(self.index)
                .map(|f| f.field_type)
                .ok_or_else(|| StepError::internal("FILTER_FIELD", "field index out of range"))?;
            self.literal = Value::from_json(&self.config.value, ty)?;
        }
        Ok(())
    }

    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(row) = ctx.read_row()? else {
            return Ok(Progress::Done);
        };
        if self.keep(row.get(self.index).unwrap_or(&Value::Null)) {
            ctx.put_row(row)?;
        }
        Ok(Progress::Continue)
    }
}
