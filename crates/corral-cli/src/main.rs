//! # corral
//!
//! Minimal daemon-less container runtime.
//! One invocation per operation; state lives on disk.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use corral_common::error::CorralError;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match commands::execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("corral: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Exit code for a failed command: the error's category when it came from
/// the runtime, 1 otherwise.
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CorralError>())
        .map_or(1, CorralError::exit_code)
}
