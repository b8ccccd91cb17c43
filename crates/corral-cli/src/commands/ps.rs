//! `corral ps`: list containers.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_runtime::{ContainerInfo, Engine};

use crate::output::{or_dash, table};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print the raw metadata as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container root cannot be read.
pub fn execute(args: &PsArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let containers = Engine::new(config).list()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
    } else {
        print!("{}", render(&containers));
    }
    Ok(0)
}

fn render(containers: &[ContainerInfo]) -> String {
    let rows: Vec<[String; 7]> = containers
        .iter()
        .map(|c| {
            [
                c.id.to_string(),
                c.name.clone(),
                or_dash(&c.pid),
                c.status.to_string(),
                or_dash(c.ip.as_deref().unwrap_or_default()),
                c.command.clone(),
                c.create_time.clone(),
            ]
        })
        .collect();
    table(["ID", "NAME", "PID", "STATUS", "IP", "COMMAND", "CREATED"], &rows)
}
