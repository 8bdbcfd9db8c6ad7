//! Pipeline run and check result types.

use std::collections::BTreeMap;

use rowflow_types::{PipelineStatus, Row, RowSchema, StepError, StepId, StepMetrics};
use serde::Serialize;

use crate::errors::PipelineError;

/// First worker-fatal cause of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: StepId,
    pub error: StepError,
}

/// Rows captured by a preview step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewRows {
    pub schema: RowSchema,
    pub rows: Vec<Row>,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub status: PipelineStatus,
    /// Sum of every copy's error counter.
    pub errors: u64,
    pub first_error: Option<StepFailure>,
    /// One entry per step copy, in declaration then copy order.
    pub steps: Vec<StepMetrics>,
    pub previews: BTreeMap<String, PreviewRows>,
    pub duration_secs: f64,
}

impl PipelineResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Finished && self.errors == 0
    }

    /// Per-step totals across copies, in declaration order.
    #[must_use]
    pub fn step_totals(&self) -> Vec<StepMetrics> {
        let mut totals: Vec<StepMetrics> = Vec::new();
        for metrics in &self.steps {
            match totals.iter_mut().find(|t| t.step == metrics.step) {
                Some(total) => total.accumulate(metrics),
                None => totals.push(metrics.clone()),
            }
        }
        totals
    }

    #[must_use]
    pub fn step(&self, name: &str, copy: u32) -> Option<&StepMetrics> {
        self.steps.iter().find(|m| m.step == name && m.copy == copy)
    }

    /// Turn a failed run into [`PipelineError::Step`].
    ///
    /// # Errors
    ///
    /// Returns the first fatal cause when the run failed.
    pub fn ensure_success(self) -> Result<Self, PipelineError> {
        match (&self.status, &self.first_error) {
            (PipelineStatus::Failed, Some(failure)) => Err(PipelineError::Step(failure.clone())),
            (PipelineStatus::Failed, None) => Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "pipeline '{}' failed without a recorded cause",
                self.pipeline
            ))),
            _ => Ok(self),
        }
    }
}

/// Output schema of one step as derived through the graph.
#[derive(Debug, Clone, Serialize)]
pub struct StepSchema {
    pub step: String,
    pub kind: String,
    pub copies: u32,
    pub output: RowSchema,
    /// Layout of error rows, when error handling is configured.
    pub error_output: Option<RowSchema>,
}

/// Result of a pipeline check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub pipeline: String,
    /// In topological order.
    pub steps: Vec<StepSchema>,
    pub channels: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(step: &str, copy: u32, read: u64) -> StepMetrics {
        StepMetrics {
            step: step.into(),
            copy,
            lines_read: read,
            ..StepMetrics::default()
        }
    }

    fn result(status: PipelineStatus) -> PipelineResult {
        PipelineResult {
            pipeline: "r".into(),
            status,
            errors: 0,
            first_error: None,
            steps: vec![metrics("a", 0, 1), metrics("b", 0, 2), metrics("b", 1, 3)],
            previews: BTreeMap::new(),
            duration_secs: 0.1,
        }
    }

    #[test]
    fn step_totals_merge_copies() {
        let totals = result(PipelineStatus::Finished).step_totals();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[1].step, "b");
        assert_eq!(totals[1].lines_read, 5);
    }

    #[test]
    fn ensure_success_surfaces_first_error() {
        let mut failed = result(PipelineStatus::Failed);
        failed.first_error = Some(StepFailure {
            step: StepId::new("b", 1),
            error: StepError::internal("BOOM", "boom"),
        });
        let err = failed.ensure_success().unwrap_err();
        assert_eq!(err.as_step_error().unwrap().code, "BOOM");

        assert!(result(PipelineStatus::Stopped).ensure_success().is_ok());
    }

    #[test]
    fn success_requires_finished_without_errors() {
        assert!(result(PipelineStatus::Finished).is_success());
        assert!(!result(PipelineStatus::Stopped).is_success());
    }
}
