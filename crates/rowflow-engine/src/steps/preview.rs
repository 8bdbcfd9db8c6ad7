//! Sink capturing the first rows that reach it into the run result.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use rowflow_types::{Row, RowSchema, StepError};
use serde::Deserialize;

use crate::config::lenient;
use crate::context::StepContext;
use crate::result::PreviewRows;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

pub const DEFAULT_PREVIEW_LIMIT: usize = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewConfig {
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub limit: Option<usize>,
}

/// Captured rows of every preview step of one run, keyed by step name.
///
/// Copies of the same step share one entry and one limit.
#[derive(Debug, Clone, Default)]
pub struct PreviewStore {
    inner: Arc<Mutex<BTreeMap<String, PreviewRows>>>,
}

impl PreviewStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `row` unless `step` already holds `limit` rows.
    ///
    /// Returns whether the row was captured.
    pub fn append(&self, step: &str, schema: &RowSchema, row: Row, limit: usize) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = inner
            .entry(step.to_string())
            .or_insert_with(|| PreviewRows {
                schema: schema.clone(),
                rows: Vec::new(),
            });
        if entry.rows.len() >= limit {
            return false;
        }
        entry.rows.push(row);
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, PreviewRows> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StepMeta for PreviewConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn check(&self) -> Vec<String> {
        match self.limit {
            Some(0) => vec!["preview limit must be at least 1".to_string()],
            _ => Vec::new(),
        }
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        common_layout(inputs)
    }

    fn create(&self, env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        let limit = match (self.limit, env.preview_limit) {
            (Some(own), Some(run)) => own.min(run),
            (Some(own), None) => own,
            (None, Some(run)) => run,
            (None, None) => DEFAULT_PREVIEW_LIMIT,
        };
        Ok(Box::new(Preview {
            store: env.previews.clone(),
            step: env.id.name.clone(),
            schema: None,
            limit,
        }))
    }
}

struct Preview {
    store: PreviewStore,
    step: String,
    schema: Option<Arc<RowSchema>>,
    limit: usize,
}

impl Step for Preview {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        self.schema = ctx.input_schema(0);
        Ok(())
    }

    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(row) = ctx.read_row()? else {
            return Ok(Progress::Done);
        };
        if let Some(schema) = &self.schema {
            if self.store.append(&self.step, schema, row.clone(), self.limit) {
                ctx.add_lines_output(1);
            }
        }
        ctx.put_row(row)?;
        Ok(Progress::Continue)
    }
}
