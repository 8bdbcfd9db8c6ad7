//! Pass-through that sleeps before forwarding each row.

use std::sync::Arc;
use std::time::Duration;

use rowflow_types::{RowSchema, StepError};
use serde::Deserialize;

use crate::config::lenient;
use crate::context::StepContext;
use crate::step::{common_layout, Arity, Progress, Step, StepEnv, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    #[serde(deserialize_with = "lenient::number")]
    pub delay_ms: u64,
}

impl StepMeta for DelayConfig {
    fn input_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
        common_layout(inputs)
    }

    fn create(&self, _env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(Delay {
            delay: Duration::from_millis(self.delay_ms),
        }))
    }
}

struct Delay {
    delay: Duration,
}

impl Step for Delay {
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError> {
        let Some(row) = ctx.read_row()? else {
            return Ok(Progress::Done);
        };
        if !ctx.sleep(self.delay) {
            // stopped while holding the row: drop it
            return Ok(Progress::Done);
        }
        ctx.put_row(row)?;
        Ok(Progress::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delay_accepts_numeric_string() {
        let config: DelayConfig = serde_json::from_value(json!({"delay_ms": "15"})).unwrap();
        assert_eq!(config.delay_ms, 15);
        assert!(serde_json::from_value::<DelayConfig>(json!({})).is_err());
    }
}
