//! Pipeline YAML parsing.
//!
//! Placeholders are left untouched here; they are resolved against the
//! pipeline's variable scope when the pipeline is prepared.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::types::PipelineConfig;

/// Parse a pipeline YAML string.
///
/// # Errors
///
/// Returns an error if the YAML is invalid or does not match the pipeline shape.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig =
        serde_yaml::from_str(yaml_str).context("Failed to parse pipeline YAML")?;
    Ok(config)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}
