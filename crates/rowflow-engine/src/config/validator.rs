//! Structural validation of a parsed pipeline definition.
//!
//! Kind-specific settings are checked later, when each step's settings are
//! bound to its typed configuration during prepare.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{Copies, PipelineConfig};
use crate::graph;

/// Collect every structural problem in `config`.
#[must_use]
pub fn collect_errors(config: &PipelineConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.steps.is_empty() {
        errors.push("Pipeline must declare at least one step".to_string());
    }

    if config.resources.channel_capacity == 0 {
        errors.push("channel_capacity must be at least 1".to_string());
    }
    if config.resources.feedback_rows == 0 {
        errors.push("feedback_rows must be at least 1".to_string());
    }

    let mut names = HashSet::new();
    for (i, step) in config.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            errors.push(format!("Step {i} has an empty name"));
        } else if !names.insert(step.name.as_str()) {
            errors.push(format!("Duplicate step name '{}'", step.name));
        }
        if step.kind.trim().is_empty() {
            errors.push(format!("Step '{}' has an empty kind", step.name));
        }
        if step.copies == Copies::Count(0) {
            errors.push(format!("Step '{}': copies must be at least 1", step.name));
        }
        if let Some(eh) = &step.error_handling {
            if !config.hops.iter().any(|h| h.enabled && h.from == step.name && h.to == eh.target) {
                errors.push(format!(
                    "Step '{}': error handling target '{}' has no enabled hop from this step",
                    step.name, eh.target
                ));
            }
            if eh.max_percent_errors.is_some_and(|p| p > 100) {
                errors.push(format!(
                    "Step '{}': max_percent_errors must be between 0 and 100",
                    step.name
                ));
            }
            let diag = [
                &eh.fields.count,
                &eh.fields.description,
                &eh.fields.field,
                &eh.fields.code,
            ];
            let unique: HashSet<&String> = diag.iter().copied().collect();
            if unique.len() != diag.len() || diag.iter().any(|f| f.trim().is_empty()) {
                errors.push(format!(
                    "Step '{}': error field names must be non-empty and distinct",
                    step.name
                ));
            }
        }
    }

    let mut seen_hops = HashSet::new();
    for hop in &config.hops {
        for end in [&hop.from, &hop.to] {
            if config.step(end).is_none() {
                errors.push(format!(
                    "Hop '{} -> {}' references unknown step '{end}'",
                    hop.from, hop.to
                ));
            }
        }
        if hop.from == hop.to {
            errors.push(format!("Hop '{} -> {}' loops onto itself", hop.from, hop.to));
        }
        if !seen_hops.insert((hop.from.as_str(), hop.to.as_str())) {
            errors.push(format!("Duplicate hop '{} -> {}'", hop.from, hop.to));
        }
        if let Some(partition) = &hop.partition {
            if partition.field.trim().is_empty() {
                errors.push(format!(
                    "Hop '{} -> {}': partition field must not be empty",
                    hop.from, hop.to
                ));
            }
        }
    }

    if let Err(cycle) = graph::topological_order(config) {
        errors.push(format!(
            "Pipeline graph contains a cycle through step(s): {}",
            cycle.join(", ")
        ));
    }

    errors
}

/// Validate a parsed pipeline configuration.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
