//! `corral logs`: print a detached container's output.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::Engine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or the log is unreadable.
pub fn execute(args: &LogsArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let logs = Engine::new(config).logs(&args.container)?;
    print!("{logs}");
    Ok(0)
}
