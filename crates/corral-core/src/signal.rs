//! Graceful-then-forced process termination.

use std::time::{Duration, Instant};

use corral_common::error::{CorralError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Poll interval while waiting for a signalled process to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Returns whether `pid` names a live (non-zombie) process.
///
/// Reads the state field of `/proc/<pid>/stat`; a missing entry or a
/// zombie/dead state counts as not alive.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name may contain spaces and parentheses; the state
    // follows the last closing parenthesis.
    let state = stat
        .rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next());
    !matches!(state, None | Some("Z" | "X" | "x"))
}

/// Sends SIGTERM, waits up to `grace`, then SIGKILL and waits again.
///
/// Returns `true` if the process is gone afterwards.
///
/// # Errors
///
/// Returns an error if `pid` does not fit a kernel pid or a signal cannot
/// be delivered for a reason other than the process having exited.
pub fn terminate(pid: u32, grace: Duration) -> Result<bool> {
    let target = to_pid(pid)?;
    if !is_alive(pid) {
        return Ok(true);
    }

    match kill(target, Signal::SIGTERM) {
        Ok(()) => tracing::debug!(pid, "sent SIGTERM"),
        Err(Errno::ESRCH) => return Ok(true),
        Err(e) => {
            return Err(CorralError::resource(format!("SIGTERM to {pid} failed: {e}")));
        }
    }
    if wait_for_exit(pid, grace) {
        return Ok(true);
    }

    match kill(target, Signal::SIGKILL) {
        Ok(()) => tracing::info!(pid, "process ignored SIGTERM, sent SIGKILL"),
        Err(Errno::ESRCH) => return Ok(true),
        Err(e) => {
            return Err(CorralError::resource(format!("SIGKILL to {pid} failed: {e}")));
        }
    }
    Ok(wait_for_exit(pid, grace))
}

/// Polls until the process is gone or `timeout` elapses.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(timeout));
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| CorralError::config(format!("invalid pid {pid}")))
}
