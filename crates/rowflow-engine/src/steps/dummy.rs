//! Pass-through step; with no outgoing hops it acts as a sink.

use std::sync::Arc;

use rowflow_types::{RowSchema, StepError};
use serde::Deserialize;

use crate::context::StepContext;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DummyConfig {}

impl StepMeta for DummyConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(0)
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        if inputs.is_empty() {
            return Ok(RowSchema::empty());
        }
        common_layout(inputs)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(Dummy))
    }
}

struct Dummy;

impl Step for Dummy {
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        match ctx.read_row()? {
            Some(row) => {
                ctx.put_row(row)?;
                Ok(Progress::Continue)
            }
            None => Ok(Progress::Done),
        }
    }
}
