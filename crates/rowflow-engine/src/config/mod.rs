//! Pipeline definition: YAML types, parsing and structural validation.

pub(crate) mod lenient;
pub mod parser;
pub mod types;
pub mod validator;
