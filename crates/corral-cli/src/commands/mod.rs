//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_common::config::CorralConfig;
use corral_common::constants::CONFIG_ENV;

/// Corral: minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file overriding the default paths.
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Keep all state under this directory instead of the system paths.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Resolves the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be parsed.
    pub fn load_config(&self) -> anyhow::Result<CorralConfig> {
        let loaded = match &self.config {
            Some(path) => CorralConfig::load(path)?,
            None => CorralConfig::default(),
        };
        Ok(match &self.root {
            Some(root) => CorralConfig {
                cgroup_parent: loaded.cgroup_parent,
                stop_grace_ms: loaded.stop_grace_ms,
                drain_grace_ms: loaded.drain_grace_ms,
                ..CorralConfig::rooted(root)
            },
            None => loaded,
        })
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container-side entry point; not for direct use.
    #[command(hide = true)]
    Init,
    /// List containers.
    Ps(ps::PsArgs),
    /// Print the output of a detached container.
    Logs(logs::LogsArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a stopped container.
    Rm(rm::RmArgs),
    /// Save a running container's filesystem as an image.
    Commit(commit::CommitArgs),
    /// Manage networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler and returns the
/// process exit code.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<u8> {
    if matches!(cli.command, Command::Init) {
        return init::execute();
    }
    let config = cli.load_config()?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Init => init::execute(),
        Command::Ps(args) => ps::execute(&args, config),
        Command::Logs(args) => logs::execute(&args, config),
        Command::Exec(args) => exec::execute(&args, config),
        Command::Stop(args) => stop::execute(&args, config),
        Command::Rm(args) => rm::execute(&args, config),
        Command::Commit(args) => commit::execute(&args, config),
        Command::Network(args) => network::execute(args, &config),
    }
}

/// Clamps a child's exit code into the range a process can return.
#[must_use]
pub fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
