//! Cgroup v1 mount point discovery from `/proc/self/mountinfo`.
//!
//! The table is re-read on every lookup. Nothing is cached, so a hierarchy
//! mounted after startup is still found.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Live mount table of the calling process.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Filesystem type of a cgroup v1 hierarchy.
const CGROUP_FSTYPE: &str = "cgroup";

/// Finds the mount point of the cgroup v1 hierarchy carrying `subsystem`.
///
/// Returns `Ok(None)` when no such hierarchy is mounted.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn find_mountpoint(mountinfo: &Path, subsystem: &str) -> Result<Option<PathBuf>> {
    let content = std::fs::read_to_string(mountinfo).map_err(|e| CorralError::io(mountinfo, e))?;
    Ok(content
        .lines()
        .find_map(|line| parse_line(line, subsystem)))
}

/// Parses one mountinfo line:
///
/// ```text
/// 35 24 0:30 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid - cgroup cgroup rw,cpu,cpuacct
/// ```
///
/// Field 5 is the mount point; after the `-` separator come the filesystem
/// type, the source, and the super options.
fn parse_line(line: &str, subsystem: &str) -> Option<PathBuf> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let sep = fields.iter().position(|f| *f == "-")?;
    let fstype = fields.get(sep + 1)?;
    let super_opts = fields.get(sep + 3)?;
    if *fstype != CGROUP_FSTYPE || !super_opts.split(',').any(|opt| opt == subsystem) {
        return None;
    }
    fields.get(4).map(PathBuf::from)
}
