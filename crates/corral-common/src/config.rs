//! Global configuration model for the Corral runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CorralError, Result};

/// Root configuration for the Corral runtime.
///
/// Every field has a default, so a configuration file only needs to list
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorralConfig {
    /// Per-container metadata, logs, and overlay layers.
    pub container_root: PathBuf,
    /// One JSON file per network.
    pub network_dir: PathBuf,
    /// IPAM bitmap state file.
    pub ipam_file: PathBuf,
    /// Read-only image layers.
    pub image_dir: PathBuf,
    /// Parent of every container cgroup, relative to each subsystem mount.
    pub cgroup_parent: String,
    /// Milliseconds between SIGTERM and SIGKILL when stopping a container.
    pub stop_grace_ms: u64,
    /// Milliseconds to wait per residual pid when draining a cgroup.
    pub drain_grace_ms: u64,
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            container_root: PathBuf::from(constants::DEFAULT_CONTAINER_ROOT),
            network_dir: PathBuf::from(constants::DEFAULT_NETWORK_DIR),
            ipam_file: PathBuf::from(constants::DEFAULT_IPAM_FILE),
            image_dir: PathBuf::from(constants::DEFAULT_IMAGE_DIR),
            cgroup_parent: constants::DEFAULT_CGROUP_PARENT.to_string(),
            stop_grace_ms: constants::DEFAULT_STOP_GRACE_MS,
            drain_grace_ms: constants::DEFAULT_DRAIN_GRACE_MS,
        }
    }
}

impl CorralConfig {
    /// Builds a configuration with every path placed under `root`.
    ///
    /// Used by `--root` and by tests that need a scratch state tree.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            container_root: root.join("containers"),
            network_dir: root.join("network").join("network"),
            ipam_file: root.join("network").join("ipam").join("subnet.json"),
            image_dir: root.join("images"),
            ..Self::default()
        }
    }

    /// Loads a configuration file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| CorralError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Cgroup hierarchy path for a container, relative to a subsystem mount.
    #[must_use]
    pub fn cgroup_path(&self, container_id: &str) -> String {
        format!("{}/{container_id}", self.cgroup_parent)
    }

    /// Directory holding everything that belongs to one container.
    #[must_use]
    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.container_root.join(container_id)
    }

    /// Grace period between SIGTERM and SIGKILL on stop.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Grace period per residual pid on cgroup drain.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}
