//! Temporary entry into another process's network namespace.

use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use corral_common::error::{CorralError, Result};
use nix::sched::{CloneFlags, setns};

/// Namespace handle of the calling thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Switches the calling thread into a process's network namespace and
/// switches it back when dropped.
///
/// `setns(2)` acts on the calling thread only, so the guard is `!Send`: it
/// must be dropped on the thread that created it. Commands spawned while
/// the guard is alive run inside the target namespace.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
    pid: u32,
    _thread_bound: PhantomData<*const ()>,
}

impl NetnsGuard {
    /// Enters the network namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace handle cannot be opened or
    /// `setns(2)` is refused.
    pub fn enter(pid: u32) -> Result<Self> {
        let target_path = PathBuf::from(format!("/proc/{pid}/ns/net"));
        let target = File::open(&target_path).map_err(|e| CorralError::io(&target_path, e))?;
        let original = File::open(THREAD_NETNS).map_err(|e| CorralError::io(THREAD_NETNS, e))?;

        setns(&target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| CorralError::resource(format!("setns into netns of {pid} failed: {e}")))?;
        tracing::debug!(pid, "entered network namespace");
        Ok(Self {
            original,
            pid,
            _thread_bound: PhantomData,
        })
    }

    /// Pid whose namespace is currently entered.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        match setns(&self.original, CloneFlags::CLONE_NEWNET) {
            Ok(()) => tracing::debug!(pid = self.pid, "restored original network namespace"),
            Err(e) => {
                tracing::error!(pid = self.pid, error = %e, "failed to restore network namespace");
            }
        }
    }
}
