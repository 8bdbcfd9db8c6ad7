pub mod check;
pub mod run;

use anyhow::{bail, Result};
use rowflow_engine::ExecutionOptions;

/// Build execution options from repeated `--var KEY=VALUE` flags.
pub(crate) fn options_from_vars(vars: &[String]) -> Result<ExecutionOptions> {
    let mut options = ExecutionOptions::default();
    for var in vars {
        let Some((name, value)) = var.split_once('=') else {
            bail!("Invalid --var '{var}', expected KEY=VALUE");
        };
        if name.trim().is_empty() {
            bail!("Invalid --var '{var}', variable name is empty");
        }
        options = options.with_variable(name.trim(), value);
    }
    Ok(options)
}
