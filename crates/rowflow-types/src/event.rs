//! Observer events emitted by a running pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metric::StepMetrics;
use crate::status::{PipelineStatus, StepId, StepStatus};

/// Severity attached to a [`EventKind::StepLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Payload of a pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PipelineStatus {
        status: PipelineStatus,
    },
    StepStatus {
        step: StepId,
        status: StepStatus,
    },
    StepMetrics {
        metrics: StepMetrics,
    },
    StepLog {
        step: StepId,
        level: LogLevel,
        message: String,
    },
}

/// One event on the pipeline's event stream.
///
/// `seq` is strictly increasing per pipeline; every subscriber sees events in
/// `seq` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub pipeline: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_flat_and_tagged() {
        let event = PipelineEvent {
            seq: 3,
            at: Utc::now(),
            pipeline: "orders".into(),
            kind: EventKind::StepStatus {
                step: StepId::new("merge", 0),
                status: StepStatus::Running,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_status");
        assert_eq!(json["status"], "running");
        assert_eq!(json["step"]["name"], "merge");
        assert_eq!(json["seq"], 3);
    }
}
