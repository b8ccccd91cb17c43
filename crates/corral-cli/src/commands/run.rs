//! `corral run`: create and start a container.

use clap::Args;
use corral_common::config::CorralConfig;
use corral_common::types::{PortMapping, ResourceConfig};
use corral_runtime::{Engine, RunOptions};

use super::exit_status;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach to the terminal and wait for the container to exit.
    #[arg(short = 't', long, conflicts_with = "detach")]
    pub tty: bool,

    /// Run in the background, writing output to the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Memory limit, e.g. `100m`.
    #[arg(short, long)]
    pub memory: Option<String>,

    /// CPU share weight, e.g. `512`.
    #[arg(long)]
    pub cpushare: Option<String>,

    /// CPUs the container may run on, e.g. `0-1`.
    #[arg(long)]
    pub cpuset: Option<String>,

    /// Bind mount as `hostDir:containerDir`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Port forward as `hostPort:containerPort`; repeatable.
    #[arg(short, long = "port")]
    pub ports: Vec<PortMapping>,

    /// Network to connect the container to.
    #[arg(long)]
    pub net: Option<String>,

    /// Image to build the root filesystem from.
    pub image: String,

    /// Command and arguments to run.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            tty: self.tty,
            name: self.name,
            image: self.image,
            command: self.command,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpushare,
                cpu_set: self.cpuset,
            },
            volume: self.volume,
            port_mappings: self.ports,
            network: self.net,
        }
    }
}

/// Executes the `run` command.
///
/// Detached containers print their id; foreground containers pass their
/// exit code through.
///
/// # Errors
///
/// Returns an error if any creation step fails.
pub fn execute(args: RunArgs, config: CorralConfig) -> anyhow::Result<u8> {
    let engine = Engine::new(config);
    let created = engine.create(&args.into_options())?;
    match created.exit_code {
        Some(code) => Ok(exit_status(code)),
        None => {
            println!("{}", created.id);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Command};
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<RunArgs, clap::Error> {
        let cli = Cli::try_parse_from(std::iter::once("corral").chain(args.iter().copied()))?;
        match cli.command {
            Command::Run(run) => Ok(run),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn full_flag_set_maps_to_options() {
        let args = parse(&[
            "run", "-d", "--name", "web", "-m", "100m", "--cpushare", "512", "--cpuset", "0-1", "-v",
            "/srv:/data", "-p", "8080:80", "-p", "8443:443", "--net", "testbr", "busybox", "sh", "-c",
            "echo hi",
        ])
        .unwrap();
        let options = args.into_options();
        assert!(!options.tty);
        assert_eq!(options.name.as_deref(), Some("web"));
        assert_eq!(options.resources.memory_limit.as_deref(), Some("100m"));
        assert_eq!(options.resources.cpu_set.as_deref(), Some("0-1"));
        assert_eq!(options.port_mappings.len(), 2);
        assert_eq!(options.network.as_deref(), Some("testbr"));
        assert_eq!(options.image, "busybox");
        assert_eq!(options.command, vec!["sh", "-c", "echo hi"]);
    }

    #[test]
    fn tty_and_detach_are_exclusive() {
        assert!(parse(&["run", "-t", "-d", "busybox", "sh"]).is_err());
        assert!(parse(&["run", "-t", "busybox", "sh"]).unwrap().tty);
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["run", "busybox"]).is_err());
    }

    #[test]
    fn malformed_port_is_rejected_at_parse_time() {
        assert!(parse(&["run", "-p", "8080", "busybox", "sh"]).is_err());
    }
}
