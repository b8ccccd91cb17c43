//! `corral stop`: stop a running container.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is not running or cleanup fails.
pub fn execute(args: &StopArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let info = Engine::new(config).stop(&args.container)?;
    println!("{}", info.id);
    Ok(0)
}
