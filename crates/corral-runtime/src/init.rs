//! Code that runs as pid 1 inside the new namespaces.
//!
//! Reached through the hidden `init` subcommand. The working directory was
//! set to the container root by the launcher; init pivots into it, mounts
//! `/proc` and `/dev`, waits for the command, and replaces itself with it.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_core::filesystem::{mount, pivot_root};

use crate::handoff;

/// Search path used when the container environment has no `PATH`.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Sets up the container filesystem and execs the handed-off command.
///
/// Only returns on failure; any error is fatal for the container.
///
/// # Errors
///
/// Returns an error if the handoff message is invalid, a mount fails, or
/// the command cannot be found or executed.
pub fn run() -> Result<Infallible> {
    let argv = handoff::receive_inherited()?;
    let root = std::env::current_dir().map_err(|e| CorralError::io(".", e))?;
    tracing::debug!(root = %root.display(), ?argv, "init received command");

    pivot_root::pivot_root(&root)?;
    mount::mount_proc(Path::new("/proc"))?;
    mount::mount_dev(Path::new("/dev"))?;

    let program = resolve(&argv[0])?;
    let args = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| CorralError::config("command argument contains a NUL byte"))?;
    let path = CString::new(program.as_os_str().as_bytes())
        .map_err(|_| CorralError::config("command path contains a NUL byte"))?;

    match nix::unistd::execv(&path, &args) {
        Ok(never) => match never {},
        Err(e) => Err(CorralError::resource(format!("exec {}: {e}", program.display()))),
    }
}

/// Finds `program` on `PATH`, relative to the new root.
fn resolve(program: &str) -> Result<PathBuf> {
    let search = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());
    which::which_in(program, Some(search), "/").map_err(|e| CorralError::NotFound {
        kind: "executable",
        id: format!("{program} ({e})"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_accepted() {
        let found = resolve("/bin/sh").unwrap();
        assert!(found.is_absolute());
        assert!(found.exists());
    }

    #[test]
    fn bare_names_are_searched_on_path() {
        let found = resolve("sh").unwrap();
        assert!(found.is_absolute());
        assert!(found.ends_with("sh"));
    }

    #[test]
    fn unknown_program_is_not_found() {
        assert!(matches!(
            resolve("definitely-not-a-real-binary-xyz"),
            Err(CorralError::NotFound { .. })
        ));
    }
}
