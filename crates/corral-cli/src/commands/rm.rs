//! `corral rm`: remove a stopped container.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is still running or its directory
/// cannot be removed.
pub fn execute(args: &RmArgs, config: CorralConfig) -> anyhow::Result<u8> {
    Engine::new(config).remove(&args.container)?;
    println!("{}", args.container);
    Ok(0)
}
