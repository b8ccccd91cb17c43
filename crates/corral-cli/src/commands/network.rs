//! `corral network`: manage bridge networks.

use clap::{Args, Subcommand};
use corral_common::config::CorralConfig;
use corral_network::{Network, NetworkDriver, NetworkRegistry};
use ipnetwork::Ipv4Network;

use crate::output::table;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create {
        /// Network driver.
        #[arg(long, default_value = "bridge")]
        driver: NetworkDriver,
        /// Subnet in CIDR notation, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: Ipv4Network,
        /// Network name, also used for the bridge link.
        name: String,
    },
    /// List networks.
    Ls {
        /// Print the raw records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove a network.
    Rm {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be opened or the operation
/// fails.
pub fn execute(args: NetworkArgs, config: &CorralConfig) -> anyhow::Result<u8> {
    let mut registry = NetworkRegistry::open(config)?;
    match args.command {
        NetworkCommand::Create { driver, subnet, name } => {
            let network = registry.create(&name, driver, subnet)?;
            println!("{} {}", network.name, network.ip_range);
        }
        NetworkCommand::Ls { json } => {
            let networks: Vec<&Network> = registry.list().collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&networks)?);
            } else {
                print!("{}", render(&networks));
            }
        }
        NetworkCommand::Rm { name } => {
            registry.remove(&name)?;
            println!("{name}");
        }
    }
    Ok(0)
}

fn render(networks: &[&Network]) -> String {
    let rows: Vec<[String; 3]> = networks
        .iter()
        .map(|n| [n.name.clone(), n.ip_range.to_string(), n.driver.to_string()])
        .collect();
    table(["NAME", "IP RANGE", "DRIVER"], &rows)
}
