//! CPU and memory-node pinning via the cgroup v1 `cpuset` controller.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Allowed CPU list control file.
pub const CPUS_FILE: &str = "cpuset.cpus";

/// Allowed memory node list control file.
pub const MEMS_FILE: &str = "cpuset.mems";

/// Restricts a cgroup to the CPUs in `cpus` (e.g. `0-1` or `0,3`).
///
/// # Errors
///
/// Returns an error if writing to `cpuset.cpus` fails.
pub fn set_cpus(cgroup_dir: &Path, cpus: &str) -> Result<()> {
    let file = cgroup_dir.join(CPUS_FILE);
    std::fs::write(&file, cpus).map_err(|e| CorralError::io(file, e))?;
    tracing::debug!(cpus, "cpuset set");
    Ok(())
}

/// Copies `cpuset.cpus` and `cpuset.mems` from the parent when empty.
///
/// A freshly created cpuset cgroup starts with both lists empty and the
/// kernel refuses to enroll tasks until they are filled in.
///
/// # Errors
///
/// Returns an error if a control file cannot be read or written.
pub fn inherit_from_parent(cgroup_dir: &Path) -> Result<()> {
    let Some(parent) = cgroup_dir.parent() else {
        return Ok(());
    };
    for name in [CPUS_FILE, MEMS_FILE] {
        let own = cgroup_dir.join(name);
        let current = read_trimmed(&own)?;
        if !current.is_empty() {
            continue;
        }
        let inherited = read_trimmed(&parent.join(name))?;
        if inherited.is_empty() {
            continue;
        }
        std::fs::write(&own, &inherited).map_err(|e| CorralError::io(&own, e))?;
        tracing::debug!(file = name, value = %inherited, "inherited cpuset from parent");
    }
    Ok(())
}

/// Reads a control file, treating a missing file as empty.
fn read_trimmed(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}
