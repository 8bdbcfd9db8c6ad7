//! Per-copy step counters as published to observers.

use serde::{Deserialize, Serialize};

use crate::status::{StepId, StepStatus};

/// Snapshot of one step copy's line counters and buffer sizes.
///
/// `lines_read`/`lines_written` count rows taken from and pushed to hops;
/// `lines_input`/`lines_output` count rows read from or written to an
/// external medium by sources and sinks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step: String,
    pub copy: u32,
    pub status: Option<StepStatus>,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_input: u64,
    pub lines_output: u64,
    pub lines_rejected: u64,
    pub errors: u64,
    /// Rows currently buffered on this copy's input hops.
    pub input_buffer_rows: usize,
    /// Rows currently buffered on this copy's output hops.
    pub output_buffer_rows: usize,
    pub duration_secs: f64,
}

impl StepMetrics {
    #[must_use]
    pub fn id(&self) -> StepId {
        StepId::new(self.step.clone(), self.copy)
    }

    /// Fold another copy's counters into this one (for per-step totals).
    pub fn accumulate(&mut self, other: &Self) {
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_input += other.lines_input;
        self.lines_output += other.lines_output;
        self.lines_rejected += other.lines_rejected;
        self.errors += other.errors;
        self.input_buffer_rows += other.input_buffer_rows;
        self.output_buffer_rows += other.output_buffer_rows;
        self.duration_secs = self.duration_secs.max(other.duration_secs);
    }
}
