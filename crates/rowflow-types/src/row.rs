//! Rows: positional value arrays aligned to a [`RowSchema`].

use serde::Serialize;

use crate::schema::RowSchema;
use crate::value::Value;

/// Violations of the row/schema invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("row has {actual} values but schema has {expected} fields")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Fixed-length ordered sequence of values.
///
/// Ownership moves from producer to consumer when a row is pushed into a
/// channel; the producer never observes it again.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Append values at the end of the row.
    pub fn extend<I: IntoIterator<Item = Value>>(&mut self, values: I) {
        self.0.extend(values);
    }

    /// Check `len(values) == schema.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::LengthMismatch`] when the row does not fit.
    pub fn conforms_to(&self, schema: &RowSchema) -> Result<(), RowError> {
        if self.0.len() == schema.len() {
            Ok(())
        } else {
            Err(RowError::LengthMismatch {
                expected: schema.len(),
                actual: self.0.len(),
            })
        }
    }

    /// Render as a JSON object keyed by the schema's field names.
    #[must_use]
    pub fn to_json_object(&self, schema: &RowSchema) -> serde_json::Map<String, serde_json::Value> {
        schema
            .names()
            .zip(self.0.iter())
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
