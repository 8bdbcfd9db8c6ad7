use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::check_pipeline;
use rowflow_engine::config::parser;
use rowflow_engine::config::validator;

/// Execute the `check` command: validate the pipeline and derive every
/// step's output layout without running it.
pub fn execute(pipeline_path: &Path, vars: &[String]) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    let options = super::options_from_vars(vars)?;
    let result = check_pipeline(&config, &options)?;

    for step in &result.steps {
        let label = if step.copies > 1 {
            format!("{} (x{}):", step.step, step.copies)
        } else {
            format!("{}:", step.step)
        };
        println!("{:18} {} {}", label, step.kind, step.output);
        if let Some(errors) = &step.error_output {
            println!("{:18} errors {}", "", errors);
        }
    }
    println!("Channels:          {}", result.channels);
    println!("\nAll checks passed.");
    Ok(())
}
