//! Entry points: run or check a pipeline definition.

use crate::config::types::PipelineConfig;
use crate::errors::PipelineError;
use crate::execution::ExecutionOptions;
use crate::pipeline::Pipeline;
use crate::result::{CheckResult, PipelineResult};

/// Prepare, start and wait for a pipeline.
///
/// A run whose workers failed is returned as a [`PipelineResult`] with status
/// `Failed` and its first fatal cause; call
/// [`PipelineResult::ensure_success`] to turn that into an error.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when the definition is invalid and
/// [`PipelineError::Infrastructure`] when a worker task could not run.
pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &ExecutionOptions,
) -> Result<PipelineResult, PipelineError> {
    tracing::info!(pipeline = %config.pipeline, steps = config.steps.len(), "Running pipeline");
    let mut pipeline = Pipeline::prepare(config, options)?;
    pipeline.start()?;
    pipeline.wait_until_finished().await
}

/// Validate a pipeline and derive every step's layout without running it.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] listing every problem found.
pub fn check_pipeline(
    config: &PipelineConfig,
    options: &ExecutionOptions,
) -> Result<CheckResult, PipelineError> {
    let pipeline = Pipeline::prepare(config, options)?;
    Ok(CheckResult {
        pipeline: pipeline.name().to_string(),
        steps: pipeline.schemas().to_vec(),
        channels: pipeline.channel_count(),
    })
}
