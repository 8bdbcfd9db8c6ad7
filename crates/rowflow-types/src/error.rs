//! Structured error model for step operations.
//!
//! [`StepError`] carries a category, a blast radius ([`ErrorScope`]), a
//! stable code and an optional offending field. Construct via the
//! category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid step configuration.
    Config,
    /// Schema mismatch or incompatibility.
    Schema,
    /// Invalid or unconvertible row data.
    Data,
    /// Channel protocol violation.
    Channel,
    /// Internal step error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Channel => "channel",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Affects a single row; may be redirected to an error hop.
    Row,
    /// Fails the whole step.
    Step,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Row => "row",
            Self::Step => "step",
        };
        f.write_str(s)
    }
}

/// Structured error raised by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    /// Name of the offending field, when the error is tied to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl StepError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            field: None,
        }
    }

    /// Configuration error (step scope).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Step, code, message)
    }

    /// Schema incompatibility (step scope).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, ErrorScope::Step, code, message)
    }

    /// Bad row data (row scope).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, ErrorScope::Row, code, message)
    }

    /// Channel protocol violation (step scope).
    #[must_use]
    pub fn channel(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Channel, ErrorScope::Step, code, message)
    }

    /// Internal error (step scope).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Step, code, message)
    }

    /// Attach the offending field name.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn is_row_level(&self) -> bool {
        self.scope == ErrorScope::Row
    }
}

impl From<crate::row::RowError> for StepError {
    fn from(err: crate::row::RowError) -> Self {
        Self::schema("ROW_SCHEMA", err.to_string())
    }
}

impl From<crate::value::ConversionError> for StepError {
    fn from(err: crate::value::ConversionError) -> Self {
        Self::data("CONVERSION", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_are_row_scoped() {
        let err = StepError::data("NOT_NULL", "amount is null").with_field("amount");
        assert!(err.is_row_level());
        assert_eq!(err.field.as_deref(), Some("amount"));
    }

    #[test]
    fn config_errors_are_step_scoped() {
        let err = StepError::config("MISSING_KEY", "keys is required");
        assert_eq!(err.category, ErrorCategory::Config);
        assert!(!err.is_row_level());
    }

    #[test]
    fn with_scope_escalates() {
        let err = StepError::data("BAD", "bad").with_scope(ErrorScope::Step);
        assert!(!err.is_row_level());
    }

    #[test]
    fn serde_roundtrip() {
        let err = StepError::data("RANGE", "value out of range").with_field("qty");
        let json = serde_json::to_string(&err).unwrap();
        let back: StepError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn display_format() {
        let err = StepError::schema("MERGE_LAYOUT", "input layouts differ");
        assert_eq!(err.to_string(), "[schema] MERGE_LAYOUT: input layouts differ");
    }
}
