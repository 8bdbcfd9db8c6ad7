//! Shared rowflow row model, error model, status and event types.
//!
//! This crate has no runtime; it is safe to depend on from both the engine and
//! any observer front-end.

pub mod error;
pub mod event;
pub mod metric;
pub mod row;
pub mod schema;
pub mod status;
pub mod value;

pub use error::{ErrorCategory, ErrorScope, StepError};
pub use event::{EventKind, LogLevel, PipelineEvent};
pub use metric::StepMetrics;
pub use row::{Row, RowError};
pub use schema::{FieldMeta, RowSchema};
pub use status::{PipelineStatus, StepId, StepStatus};
pub use value::{ConversionError, FieldType, Value};
