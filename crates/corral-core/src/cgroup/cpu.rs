//! CPU share weight via the cgroup v1 `cpu` controller.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Relative CPU weight control file.
pub const SHARES_FILE: &str = "cpu.shares";

/// Sets the CPU share weight for a cgroup.
///
/// The weight is relative: under contention a cgroup with 1024 shares gets
/// twice the CPU time of one with 512.
///
/// # Errors
///
/// Returns an error if writing to `cpu.shares` fails.
pub fn set_shares(cgroup_dir: &Path, shares: &str) -> Result<()> {
    let file = cgroup_dir.join(SHARES_FILE);
    std::fs::write(&file, shares).map_err(|e| CorralError::io(file, e))?;
    tracing::debug!(shares, "CPU shares set");
    Ok(())
}
