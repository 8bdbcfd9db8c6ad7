use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::config::parser;
use rowflow_engine::config::validator;
use rowflow_engine::{Pipeline, PipelineController, PipelineResult};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path, vars: &[String], json: bool) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    validator::validate_pipeline(&config)?;
    let options = super::options_from_vars(vars)?;

    tracing::info!(
        pipeline = %config.pipeline,
        steps = config.steps.len(),
        hops = config.hops.len(),
        "Pipeline validated"
    );

    let mut pipeline = Pipeline::prepare(&config, &options)?;
    let interrupts = tokio::spawn(watch_interrupts(pipeline.controller()));
    pipeline.start()?;
    let result = pipeline.wait_until_finished().await;
    interrupts.abort();
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    result.ensure_success()?;
    Ok(())
}

/// First Ctrl-C asks for a safe stop, the second one kills the pipeline.
async fn watch_interrupts(controller: PipelineController) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("Interrupt received, draining in-flight rows (Ctrl-C again to kill)");
    controller.safe_stop();
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Second interrupt, killing pipeline");
        controller.kill_all();
    }
}

fn print_result(result: &PipelineResult) {
    println!("Pipeline '{}' {}.", result.pipeline, result.status.as_str());
    println!(
        "  {:<18} {:>4} {:>9} {:>9} {:>9} {:>9} {:>9} {:>7}  {}",
        "Step", "Copy", "Read", "Written", "Input", "Output", "Rejected", "Errors", "Status"
    );
    for m in &result.steps {
        println!(
            "  {:<18} {:>4} {:>9} {:>9} {:>9} {:>9} {:>9} {:>7}  {}",
            m.step,
            m.copy,
            m.lines_read,
            m.lines_written,
            m.lines_input,
            m.lines_output,
            m.lines_rejected,
            m.errors,
            m.status.map_or("-", |s| s.as_str()),
        );
    }
    println!("  Errors:          {}", result.errors);
    println!("  Duration:        {:.2}s", result.duration_secs);
    if let Some(failure) = &result.first_error {
        println!("  First error:     {} {}", failure.step, failure.error);
    }

    for (step, preview) in &result.previews {
        println!("\nPreview '{}' ({} rows)", step, preview.rows.len());
        println!("  {}", preview.schema.names().collect::<Vec<_>>().join(" | "));
        for row in &preview.rows {
            let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
            println!("  {}", cells.join(" | "));
        }
    }
}
