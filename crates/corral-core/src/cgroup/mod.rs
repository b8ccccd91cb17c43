//! Cgroups v1 resource management.
//!
//! Each container owns one relative hierarchy path (`corral/<id>`) that is
//! materialised under the mount point of every managed subsystem.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod mountinfo;
pub mod subsystem;

use std::path::PathBuf;
use std::time::Duration;

use corral_common::constants::DEFAULT_DRAIN_GRACE_MS;
use corral_common::error::Result;
use corral_common::types::ResourceConfig;

pub use subsystem::Subsystem;

/// Handle to the cgroups of a specific container.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    /// Hierarchy path relative to each subsystem mount point.
    path: String,
    /// Limits last written by [`CgroupManager::set`].
    resources: ResourceConfig,
    /// Mount table consulted on every subsystem lookup.
    mountinfo: PathBuf,
    /// Grace between SIGTERM and SIGKILL while draining.
    drain_grace: Duration,
}

impl CgroupManager {
    /// Creates a manager for `path`, e.g. `corral/3f2a9c1d7e4b`.
    ///
    /// Nothing is created on disk until [`set`](Self::set) or
    /// [`apply`](Self::apply) is called.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resources: ResourceConfig::default(),
            mountinfo: PathBuf::from(mountinfo::PROC_MOUNTINFO),
            drain_grace: Duration::from_millis(DEFAULT_DRAIN_GRACE_MS),
        }
    }

    /// Reads subsystem mount points from `path` instead of the live table.
    #[must_use]
    pub fn with_mountinfo(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo = path.into();
        self
    }

    /// Overrides the drain grace period used by [`destroy`](Self::destroy).
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Relative hierarchy path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Limits last applied.
    #[must_use]
    pub const fn resources(&self) -> &ResourceConfig {
        &self.resources
    }

    /// Writes every non-blank limit into its subsystem's control file.
    ///
    /// # Errors
    ///
    /// Returns an error on the first subsystem that fails.
    pub fn set(&mut self, resources: ResourceConfig) -> Result<()> {
        for subsystem in Subsystem::ALL {
            subsystem.set(&self.mountinfo, &self.path, &resources)?;
        }
        tracing::info!(path = %self.path, ?resources, "cgroup limits set");
        self.resources = resources;
        Ok(())
    }

    /// Enrolls `pid` into every subsystem hierarchy, creating them as needed.
    ///
    /// # Errors
    ///
    /// Returns an error on the first subsystem that fails.
    pub fn apply(&self, pid: u32) -> Result<()> {
        for subsystem in Subsystem::ALL {
            subsystem.apply(&self.mountinfo, &self.path, pid)?;
        }
        tracing::info!(path = %self.path, pid, "process added to cgroups");
        Ok(())
    }

    /// Drains and removes the hierarchy in every subsystem.
    ///
    /// Every subsystem is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn destroy(&self) -> Result<()> {
        let mut first_err = None;
        for subsystem in Subsystem::ALL {
            if let Err(e) = subsystem.remove(&self.mountinfo, &self.path, self.drain_grace) {
                tracing::warn!(subsystem = %subsystem, path = %self.path, error = %e, "cgroup removal failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                tracing::info!(path = %self.path, "cgroups destroyed");
                Ok(())
            }
        }
    }
}
