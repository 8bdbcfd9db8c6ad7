//! Row schema types.
//!
//! A [`RowSchema`] is the ordered list of [`FieldMeta`] descriptors shared by
//! every row that flows through one channel. Field names are unique and the
//! field order defines the positional layout of row values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::row::RowError;
use crate::value::FieldType;

/// Field descriptor within a row schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Field name, unique within its schema.
    pub name: String,
    /// Semantic type of the field.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Display length hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Display precision hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl FieldMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: None,
            precision: None,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Ordered, name-unique list of field descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct RowSchema {
    fields: Vec<FieldMeta>,
}

impl RowSchema {
    /// Build a schema, rejecting duplicate field names.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::DuplicateField`] naming the first repeated field.
    pub fn new(fields: Vec<FieldMeta>) -> Result<Self, RowError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(RowError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Position of the named field.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the named field, or [`RowError::UnknownField`].
    ///
    /// # Errors
    ///
    /// Returns an error when no field carries `name`.
    pub fn require(&self, name: &str) -> Result<usize, RowError> {
        self.index_of(name)
            .ok_or_else(|| RowError::UnknownField(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// New schema with `extra` appended after the existing fields.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::DuplicateField`] if an appended name already exists.
    pub fn extended<I>(&self, extra: I) -> Result<Self, RowError>
    where
        I: IntoIterator<Item = FieldMeta>,
    {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self::new(fields)
    }

    /// Same names and types in the same order (length/precision hints ignored).
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && a.field_type == b.field_type)
    }
}

impl fmt::Display for RowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", field.name, field.field_type)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            FieldMeta::new("id", FieldType::Integer),
            FieldMeta::new("name", FieldType::String).with_length(64),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_field_names_rejected() {
        let err = RowSchema::new(vec![
            FieldMeta::new("id", FieldType::Integer),
            FieldMeta::new("id", FieldType::String),
        ])
        .unwrap_err();
        assert_eq!(err, RowError::DuplicateField("id".into()));
    }

    #[test]
    fn index_lookup_follows_field_order() {
        let s = schema();
        assert_eq!(s.index_of("id"), Some(0));
        assert_eq!(s.index_of("name"), Some(1));
        assert!(s.require("missing").is_err());
    }

    #[test]
    fn extended_appends_and_checks_names() {
        let s = schema();
        let ext = s
            .extended([FieldMeta::new("error_code", FieldType::String)])
            .unwrap();
        assert_eq!(ext.len(), 3);
        assert_eq!(ext.field(2).unwrap().name, "error_code");
        assert!(s.extended([FieldMeta::new("id", FieldType::Integer)]).is_err());
    }

    #[test]
    fn same_layout_ignores_hints() {
        let a = schema();
        let b = RowSchema::new(vec![
            FieldMeta::new("id", FieldType::Integer).with_precision(3),
            FieldMeta::new("name", FieldType::String),
        ])
        .unwrap();
        assert!(a.same_layout(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn field_meta_yaml_shape() {
        let field: FieldMeta =
            serde_json::from_value(serde_json::json!({"name": "amount", "type": "number"}))
                .unwrap();
        assert_eq!(field.field_type, FieldType::Number);
        assert!(field.length.is_none());
    }

    #[test]
    fn display_lists_fields() {
        assert_eq!(schema().to_string(), "[id integer, name string]");
    }
}
