//! Memory ceiling via the cgroup v1 `memory` controller.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Hard memory limit control file.
pub const LIMIT_FILE: &str = "memory.limit_in_bytes";

/// Sets the hard memory limit for a cgroup.
///
/// The kernel accepts plain byte counts as well as `k`, `m`, and `g`
/// suffixes, so `100m` is written as-is.
///
/// # Errors
///
/// Returns an error if writing to `memory.limit_in_bytes` fails.
pub fn set_limit(cgroup_dir: &Path, limit: &str) -> Result<()> {
    let file = cgroup_dir.join(LIMIT_FILE);
    std::fs::write(&file, limit).map_err(|e| CorralError::io(file, e))?;
    tracing::debug!(limit, "memory limit set");
    Ok(())
}
