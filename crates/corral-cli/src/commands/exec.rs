//! `corral exec`: run a command inside a running container.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::Engine;

use super::exit_status;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID or name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Stdio is inherited, so output goes straight to the terminal; the
/// command's exit code becomes ours.
///
/// # Errors
///
/// Returns an error if the container is not running or `nsenter` fails to
/// start.
pub fn execute(args: &ExecArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let code = Engine::new(config).exec(&args.container, &args.command)?;
    Ok(exit_status(code))
}
