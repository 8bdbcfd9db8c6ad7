//! Pipeline error model.

use rowflow_types::StepError;

use crate::result::StepFailure;

/// Categorized pipeline error.
///
/// `Config` lists every problem found before any worker started.
/// `Step` carries the first worker-fatal cause of a run.
/// `Infrastructure` wraps host-side failures (task panics, I/O).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline validation failed:\n  - {}", .0.join("\n  - "))]
    Config(Vec<String>),

    #[error("step '{}' failed: {}", .0.step, .0.error)]
    Step(StepFailure),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns the typed step error if this is a `Step` variant.
    #[must_use]
    pub fn as_step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step(failure) => Some(&failure.error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
