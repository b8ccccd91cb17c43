//! The closed set of cgroup v1 subsystems a container is constrained by.

use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ResourceConfig, non_blank};

use super::{cpu, cpuset, memory, mountinfo};
use crate::signal;

/// Enrollment file present in every v1 hierarchy level.
pub const PROCS_FILE: &str = "cgroup.procs";

/// A cgroup v1 controller managed by corral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// CPU share weight.
    Cpu,
    /// CPU pinning.
    Cpuset,
    /// Memory ceiling.
    Memory,
}

impl Subsystem {
    /// Every subsystem, in the order they are driven.
    pub const ALL: [Self; 3] = [Self::Cpuset, Self::Cpu, Self::Memory];

    /// Controller name as it appears in the mount options.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cpuset => "cpuset",
            Self::Memory => "memory",
        }
    }

    /// The requested limit for this subsystem, if any.
    #[must_use]
    pub fn limit(self, resources: &ResourceConfig) -> Option<&str> {
        let value = match self {
            Self::Cpu => resources.cpu_share.as_deref(),
            Self::Cpuset => resources.cpu_set.as_deref(),
            Self::Memory => resources.memory_limit.as_deref(),
        };
        non_blank(value)
    }

    /// Resolves `{mountpoint}/{cgroup_path}` for this subsystem.
    ///
    /// With `create`, missing levels are created top-down; cpuset levels
    /// inherit their CPU and memory-node lists from the parent as they
    /// appear.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Resource`] when the subsystem is not mounted,
    /// or an I/O error when a level cannot be created.
    pub fn hierarchy(self, mountinfo: &Path, cgroup_path: &str, create: bool) -> Result<PathBuf> {
        let mount = mountinfo::find_mountpoint(mountinfo, self.name())?.ok_or_else(|| {
            CorralError::resource(format!("cgroup subsystem {} is not mounted", self.name()))
        })?;
        let target = mount.join(cgroup_path);
        if !create || target.is_dir() {
            return Ok(target);
        }

        let mut level = mount;
        for component in Path::new(cgroup_path).components() {
            level.push(component);
            match std::fs::create_dir(&level) {
                Ok(()) => {
                    tracing::debug!(subsystem = self.name(), path = %level.display(), "cgroup level created");
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(CorralError::io(&level, e)),
            }
            if self == Self::Cpuset {
                cpuset::inherit_from_parent(&level)?;
            }
        }
        Ok(target)
    }

    /// Writes this subsystem's limit, when one is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be resolved or the control
    /// file cannot be written.
    pub fn set(self, mountinfo: &Path, cgroup_path: &str, resources: &ResourceConfig) -> Result<()> {
        let Some(value) = self.limit(resources) else {
            return Ok(());
        };
        let dir = self.hierarchy(mountinfo, cgroup_path, true)?;
        match self {
            Self::Cpu => cpu::set_shares(&dir, value),
            Self::Cpuset => cpuset::set_cpus(&dir, value),
            Self::Memory => memory::set_limit(&dir, value),
        }
    }

    /// Enrolls `pid` into this subsystem's hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be resolved or
    /// `cgroup.procs` cannot be written.
    pub fn apply(self, mountinfo: &Path, cgroup_path: &str, pid: u32) -> Result<()> {
        let dir = self.hierarchy(mountinfo, cgroup_path, true)?;
        let procs = dir.join(PROCS_FILE);
        std::fs::write(&procs, pid.to_string()).map_err(|e| CorralError::io(&procs, e))?;
        tracing::debug!(subsystem = self.name(), pid, "process enrolled");
        Ok(())
    }

    /// Drains and removes this subsystem's hierarchy directory.
    ///
    /// An unmounted subsystem or a directory that was never created is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a member cannot be signalled or migrated, or the
    /// directory cannot be removed.
    pub fn remove(self, mountinfo: &Path, cgroup_path: &str, grace: Duration) -> Result<()> {
        let Some(mount) = mountinfo::find_mountpoint(mountinfo, self.name())? else {
            return Ok(());
        };
        let dir = mount.join(cgroup_path);
        if !dir.is_dir() {
            return Ok(());
        }
        drain(&dir, grace)?;
        // cgroupfs only permits rmdir; the control files cannot be unlinked.
        std::fs::remove_dir(&dir).map_err(|e| CorralError::io(&dir, e))?;
        tracing::debug!(subsystem = self.name(), path = %dir.display(), "cgroup removed");
        Ok(())
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Upper bound on `cgroup.procs` re-reads while draining.
pub const MAX_DRAIN_ROUNDS: usize = 8;

/// Empties a cgroup directory of its member processes.
///
/// Each live pid listed in `cgroup.procs` gets SIGTERM, then SIGKILL after
/// `grace`. A process that is still alive afterwards is moved into the
/// parent's `cgroup.procs` so the directory can be removed. The file is
/// re-read after every round, since members may fork while being
/// signalled, until no live member remains.
///
/// # Errors
///
/// Returns an error if `cgroup.procs` cannot be read, a signal cannot be
/// delivered, a survivor cannot be migrated, or members are still present
/// after [`MAX_DRAIN_ROUNDS`] rounds.
pub fn drain(dir: &Path, grace: Duration) -> Result<()> {
    let procs = dir.join(PROCS_FILE);
    for round in 0..MAX_DRAIN_ROUNDS {
        let content = match std::fs::read_to_string(&procs) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CorralError::io(&procs, e)),
        };
        let members: Vec<u32> = content
            .lines()
            .filter_map(|l| l.trim().parse::<u32>().ok())
            .filter(|&pid| signal::is_alive(pid))
            .collect();
        if members.is_empty() {
            return Ok(());
        }
        tracing::debug!(round, members = members.len(), "draining cgroup");
        for pid in members {
            evict(dir, pid, grace)?;
        }
    }
    Err(CorralError::resource(format!(
        "{} still has members after {MAX_DRAIN_ROUNDS} rounds",
        dir.display()
    )))
}

fn evict(dir: &Path, pid: u32, grace: Duration) -> Result<()> {
    if signal::terminate(pid, grace)? {
        tracing::debug!(pid, "cgroup member terminated");
        return Ok(());
    }
    let Some(parent) = dir.parent() else {
        return Ok(());
    };
    let parent_procs = parent.join(PROCS_FILE);
    std::fs::write(&parent_procs, pid.to_string()).map_err(|e| CorralError::io(&parent_procs, e))?;
    tracing::warn!(pid, "cgroup member survived SIGKILL, moved to parent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn limit_ignores_blank_values() {
        let resources = ResourceConfig {
            memory_limit: Some("100m".into()),
            cpu_share: Some("  ".into()),
            cpu_set: None,
        };
        assert_eq!(Subsystem::Memory.limit(&resources), Some("100m"));
        assert_eq!(Subsystem::Cpu.limit(&resources), None);
        assert_eq!(Subsystem::Cpuset.limit(&resources), None);
    }

    #[test]
    fn display_uses_controller_name() {
        assert_eq!(Subsystem::Cpu.to_string(), "cpu");
        assert_eq!(Subsystem::Cpuset.to_string(), "cpuset");
        assert_eq!(Subsystem::Memory.to_string(), "memory");
    }

    #[test]
    fn unmounted_subsystem_is_a_resource_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = dir.path().join("mountinfo");
        std::fs::write(&table, "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n").unwrap();
        let err = Subsystem::Memory
            .hierarchy(&table, "corral/abc", true)
            .expect_err("not mounted");
        assert!(matches!(err, CorralError::Resource { .. }));
        // Removal of something never mounted is a no-op.
        Subsystem::Memory
            .remove(&table, "corral/abc", Duration::from_millis(1))
            .expect("remove");
    }

    #[test]
    fn drain_kills_member_that_ignores_sigterm() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .expect("spawn sh");
        std::thread::sleep(Duration::from_millis(200));

        let root = tempfile::tempdir().expect("tempdir");
        let cg = root.path().join("member");
        std::fs::create_dir(&cg).unwrap();
        std::fs::write(cg.join(PROCS_FILE), format!("{}\n", child.id())).unwrap();

        drain(&cg, Duration::from_millis(200)).expect("drain");
        let status = child.wait().expect("wait");
        assert_eq!(status.signal(), Some(libc::SIGKILL));
        // Nothing survived, so nothing was migrated.
        assert!(!root.path().join(PROCS_FILE).exists());
    }

    #[test]
    fn drain_rereads_members_that_join_midway() {
        let mut first = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .expect("spawn sh");
        let mut late = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        std::thread::sleep(Duration::from_millis(200));

        let root = tempfile::tempdir().expect("tempdir");
        let cg = root.path().join("member");
        std::fs::create_dir(&cg).unwrap();
        let procs = cg.join(PROCS_FILE);
        std::fs::write(&procs, format!("{}\n", first.id())).unwrap();

        // Joins while the first member is still inside its grace period.
        let joiner = {
            let procs = procs.clone();
            let pid = late.id();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                let listed = std::fs::read_to_string(&procs).unwrap();
                std::fs::write(&procs, format!("{listed}{pid}\n")).unwrap();
            })
        };

        drain(&cg, Duration::from_millis(400)).expect("drain");
        joiner.join().unwrap();
        assert_eq!(first.wait().expect("wait").signal(), Some(libc::SIGKILL));
        assert_eq!(late.wait().expect("wait").signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn drain_without_procs_file_is_noop() {
        let root = tempfile::tempdir().expect("tempdir");
        drain(root.path(), Duration::from_millis(1)).expect("drain");
    }
}
