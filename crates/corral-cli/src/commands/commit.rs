//! `corral commit`: snapshot a container into an image.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::Engine;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container ID or name.
    pub container: String,

    /// Name of the new image.
    pub image: String,
}

/// Executes the `commit` command.
///
/// # Errors
///
/// Returns an error if the container is not running or the archive cannot
/// be written.
pub fn execute(args: &CommitArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let path = Engine::new(config).commit(&args.container, &args.image)?;
    println!("{}", path.display());
    Ok(0)
}
