//! Invocation of host tools (`ip`, `iptables`, `nsenter`).
//!
//! Network plumbing goes through [`CommandRunner`] so that the registry and
//! driver logic can be exercised without touching the host.

use std::process::Command;
use std::sync::Mutex;

use corral_common::error::{CorralError, Result};

/// Runs an external program to completion.
pub trait CommandRunner {
    /// Runs `program` with `args`, returning its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ExternalTool`] if the program cannot be spawned
    /// or exits unsuccessfully.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Runs `program` for its side effects, discarding standard output.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    fn call(&self, program: &str, args: &[&str]) -> Result<()> {
        self.run(program, args).map(drop)
    }
}

/// Runs commands on the host.
///
/// The child inherits the namespaces of the calling thread, so commands run
/// while a [`crate::namespace::network::NetnsGuard`] is held execute inside
/// the container's network namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        tracing::debug!(program, args = %args.join(" "), "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| CorralError::ExternalTool {
                program: program.to_string(),
                args: args.join(" "),
                status: "spawn failed".to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CorralError::ExternalTool {
                program: program.to_string(),
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Records invocations instead of running them.
///
/// Every call is stored as a single space-joined line. A call whose line
/// contains the configured failure pattern returns an error.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingRunner {
    /// Creates a runner that accepts every command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that fails commands containing `pattern`.
    #[must_use]
    pub fn failing_on(pattern: impl Into<String>) -> Self {
        Self {
            calls: Mutex::default(),
            fail_on: Some(pattern.into()),
        }
    }

    /// Returns the recorded command lines in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }
        if self.fail_on.as_deref().is_some_and(|p| line.contains(p)) {
            return Err(CorralError::ExternalTool {
                program: program.to_string(),
                args: args.join(" "),
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(String::new())
    }
}
