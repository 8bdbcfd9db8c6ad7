mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rowflow",
    version,
    about = "Streaming step-graph pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline until it finishes, fails or is interrupted
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Pipeline variable override, repeatable (KEY=VALUE)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Validate a pipeline and print the layout each step produces
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Pipeline variable override, repeatable (KEY=VALUE)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline, vars, json } => commands::run::execute(&pipeline, &vars, json).await,
        Commands::Check { pipeline, vars } => commands::check::execute(&pipeline, &vars),
    }
}
