//! Streaming step-graph execution engine.
//!
//! Steps exchange rows over bounded [`channel::RowChannel`]s; every step copy
//! runs in its own worker, and the [`pipeline::Pipeline`] scheduler wires,
//! starts and aggregates them.

pub mod channel;
pub mod config;
pub mod context;
pub mod control;
pub mod errors;
pub mod events;
pub mod execution;
pub mod graph;
pub mod listener;
pub mod orchestrator;
pub mod pipeline;
pub mod result;
pub(crate) mod routing;
pub(crate) mod run_state;
pub mod step;
pub mod steps;
pub mod variables;
pub(crate) mod wiring;
pub(crate) mod worker;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use execution::ExecutionOptions;
pub use listener::RowListener;
pub use orchestrator::{check_pipeline, run_pipeline};
pub use pipeline::{Pipeline, PipelineController};
pub use result::{CheckResult, PipelineResult, StepFailure};
