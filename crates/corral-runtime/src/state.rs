//! Persistent container metadata.
//!
//! Each container owns `{container_root}/{id}/`; its `config.json` is the
//! record of the container and the directory itself is the unit of
//! existence. There is no daemon and no shared index file.

use std::path::PathBuf;

use corral_common::constants::{CONFIG_FILE_NAME, LOG_FILE_NAME, MOUNT_DIR};
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;
use corral_core::cgroup::mountinfo::PROC_MOUNTINFO;
use corral_core::filesystem::mount;

use crate::container::ContainerInfo;

/// Directory-per-container metadata store.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    root: PathBuf,
    mountinfo: PathBuf,
}

impl ContainerStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mountinfo: PathBuf::from(PROC_MOUNTINFO),
        }
    }

    /// Checks for live root filesystems against `path` instead of the
    /// process mount table.
    #[must_use]
    pub fn with_mountinfo(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo = path.into();
        self
    }

    /// Directory owned by a container.
    #[must_use]
    pub fn dir(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Path of a container's metadata file.
    #[must_use]
    pub fn config_path(&self, id: &ContainerId) -> PathBuf {
        self.dir(id).join(CONFIG_FILE_NAME)
    }

    /// Path of a detached container's output.
    #[must_use]
    pub fn log_path(&self, id: &ContainerId) -> PathBuf {
        self.dir(id).join(LOG_FILE_NAME)
    }

    /// Writes `info`, creating the container directory on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, info: &ContainerInfo) -> Result<()> {
        let dir = self.dir(&info.id);
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;
        let path = dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&path, json).map_err(|e| CorralError::io(&path, e))?;
        tracing::debug!(id = %info.id, status = %info.status, "container metadata saved");
        Ok(())
    }

    /// Reads the metadata of container `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] for an id that is not a single path
    /// component, [`CorralError::NotFound`] if the container has no
    /// metadata file, or an error if it cannot be read or parsed.
    pub fn load(&self, id: &ContainerId) -> Result<ContainerInfo> {
        validate_key(id.as_str())?;
        let path = self.config_path(id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CorralError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                }
            } else {
                CorralError::io(&path, e)
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Finds a container by id, falling back to its name.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] when neither matches, or a
    /// configuration error for a key that is not a single path component
    /// or a name shared by several containers.
    pub fn resolve(&self, key: &str) -> Result<ContainerInfo> {
        validate_key(key)?;
        match self.load(&ContainerId::new(key)) {
            Err(CorralError::NotFound { .. }) => {}
            other => return other,
        }
        let mut matches = self.list()?.into_iter().filter(|c| c.name == key);
        match (matches.next(), matches.next()) {
            (Some(info), None) => Ok(info),
            (Some(_), Some(_)) => Err(CorralError::config(format!(
                "name {key} is ambiguous, use the container id"
            ))),
            (None, _) => Err(CorralError::NotFound {
                kind: "container",
                id: key.to_string(),
            }),
        }
    }

    /// Reads every container's metadata, ordered by creation time.
    ///
    /// Directories without a readable `config.json` are logged and
    /// skipped. A missing root yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be listed.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&self.root, e)),
        };

        let mut containers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorralError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = ContainerId::new(entry.file_name().to_string_lossy());
            match self.load(&id) {
                Ok(info) => containers.push(info),
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping container without readable metadata"),
            }
        }
        containers.sort_by(|a, b| a.create_time.cmp(&b.create_time).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        Ok(containers)
    }

    /// Deletes everything the container owns on disk.
    ///
    /// Refuses while the container's root filesystem is still mounted, so
    /// the removal never descends into the image or a bound volume.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Resource`] while the root is mounted, or an
    /// error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &ContainerId) -> Result<()> {
        validate_key(id.as_str())?;
        let dir = self.dir(id);
        let merged = dir.join(MOUNT_DIR);
        if mount::is_mount_point_in(&self.mountinfo, &merged)? {
            return Err(CorralError::resource(format!(
                "{} is still mounted, refusing to delete container {id}",
                merged.display()
            )));
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(id = %id, "container directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(dir, e)),
        }
    }
}

/// Accepts keys that name exactly one entry under the store root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') || key.contains("..") || key == "." {
        return Err(CorralError::config(format!(
            "invalid container id or name {key:?}"
        )));
    }
    Ok(())
}
