//! The writable root filesystem a container runs in.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use corral_common::config::CorralConfig;
use corral_common::constants::MOUNT_DIR;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;

use super::image;
use super::mount;
use super::overlayfs::OverlayLayout;

/// A `hostPath:containerPath` bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Directory on the host, created if absent.
    pub host: PathBuf,
    /// Mount location inside the container root.
    pub container: PathBuf,
}

impl Volume {
    /// Where the volume lands below a mounted container root.
    #[must_use]
    pub fn target_in(&self, root: &Path) -> PathBuf {
        root.join(self.container.strip_prefix("/").unwrap_or(&self.container))
    }
}

impl FromStr for Volume {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(':').collect::<Vec<_>>().as_slice() {
            [host, container] if !host.trim().is_empty() && !container.trim().is_empty() => {
                Ok(Self {
                    host: PathBuf::from(host.trim()),
                    container: PathBuf::from(container.trim()),
                })
            }
            _ => Err(CorralError::config(format!(
                "volume must be HOST_DIR:CONTAINER_DIR, got {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// Prepares and discards container root filesystems.
pub trait Workspace {
    /// Assembles the root for `id` from `image`, binding `volume` into it,
    /// and returns the path the container should use as `/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing or a mount fails.
    fn ensure(&self, id: &ContainerId, image: &str, volume: Option<&Volume>) -> Result<PathBuf>;

    /// Undoes [`ensure`](Self::ensure). Host volume contents are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if an unmount or directory removal fails.
    fn teardown(&self, id: &ContainerId, volume: Option<&Volume>) -> Result<()>;

    /// Path of the mounted root for `id`, whether or not it is mounted.
    fn root(&self, id: &ContainerId) -> PathBuf;
}

/// [`Workspace`] backed by `OverlayFS` over an image directory.
#[derive(Debug, Clone)]
pub struct OverlayWorkspace {
    image_dir: PathBuf,
    container_root: PathBuf,
}

impl OverlayWorkspace {
    /// Creates a workspace reading images from `image_dir` and placing
    /// container layers under `container_root`.
    #[must_use]
    pub const fn new(image_dir: PathBuf, container_root: PathBuf) -> Self {
        Self {
            image_dir,
            container_root,
        }
    }

    /// Creates a workspace from the configured directories.
    #[must_use]
    pub fn from_config(config: &CorralConfig) -> Self {
        Self::new(config.image_dir.clone(), config.container_root.clone())
    }

    fn layout(&self, id: &ContainerId, lower: PathBuf) -> OverlayLayout {
        OverlayLayout::new(&self.container_root.join(id.as_str()), lower)
    }

    fn bind_volume(root: &Path, volume: &Volume) -> Result<()> {
        std::fs::create_dir_all(&volume.host).map_err(|e| CorralError::io(&volume.host, e))?;
        let target = volume.target_in(root);
        std::fs::create_dir_all(&target).map_err(|e| CorralError::io(&target, e))?;
        mount::bind_mount(&volume.host, &target)
    }
}

impl Workspace for OverlayWorkspace {
    fn ensure(&self, id: &ContainerId, image: &str, volume: Option<&Volume>) -> Result<PathBuf> {
        let lower = image::resolve(&self.image_dir, image)?;
        let layout = self.layout(id, lower);
        layout.mount()?;

        if let Some(volume) = volume {
            if let Err(e) = Self::bind_volume(&layout.merged, volume) {
                if let Err(cleanup) = layout.unmount_and_remove() {
                    tracing::warn!(id = %id, error = %cleanup, "overlay cleanup failed");
                }
                return Err(e);
            }
            tracing::info!(id = %id, volume = %volume, "volume mounted");
        }
        Ok(layout.merged)
    }

    fn teardown(&self, id: &ContainerId, volume: Option<&Volume>) -> Result<()> {
        // Teardown never touches the lower layer.
        let layout = self.layout(id, PathBuf::new());
        if let Some(volume) = volume {
            mount::unmount(&volume.target_in(&layout.merged))?;
        }
        layout.unmount_and_remove()?;
        tracing::info!(id = %id, "workspace torn down");
        Ok(())
    }

    fn root(&self, id: &ContainerId) -> PathBuf {
        self.container_root.join(id.as_str()).join(MOUNT_DIR)
    }
}
