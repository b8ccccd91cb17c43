//! Running extra commands inside a live container.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Command;

use corral_common::error::{CorralError, Result};

/// Host tool that joins another process's namespaces.
const NSENTER: &str = "nsenter";

/// Runs `command` in the namespaces of `pid` with the container's
/// environment, inheriting stdio, and returns its exit code.
///
/// # Errors
///
/// Returns a configuration error for an empty command, or an error if the
/// environment cannot be read or `nsenter` cannot be started.
pub fn exec_in(pid: u32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(CorralError::config("exec needs a command"));
    }
    let environ = Path::new("/proc").join(pid.to_string()).join("environ");
    let raw = std::fs::read(&environ).map_err(|e| CorralError::io(&environ, e))?;

    let target = pid.to_string();
    let status = Command::new(NSENTER)
        .args(nsenter_args(&target))
        .args(command)
        .env_clear()
        .envs(parse_environ(&raw))
        .status()
        .map_err(|e| CorralError::io(NSENTER, e))?;
    tracing::info!(pid, ?command, %status, "exec finished");
    // A signal death has no code; report it like a shell would.
    Ok(status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1))
}

/// Arguments that make `nsenter` join every namespace of `target`.
fn nsenter_args(target: &str) -> [&str; 8] {
    ["--target", target, "--mount", "--uts", "--ipc", "--net", "--pid", "--"]
}

/// Splits a NUL-separated `environ` blob into key/value pairs.
///
/// Entries without `=` are dropped.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}
