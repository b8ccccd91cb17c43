//! `OverlayFS` layout of a container's root filesystem.
//!
//! The image directory is the single read-only lower layer; the writable
//! upper layer, the overlay work directory, and the merged mount point all
//! live in the container's own directory.

use std::path::{Path, PathBuf};

use corral_common::constants::{MOUNT_DIR, WORK_DIR, WRITE_LAYER_DIR};
use corral_common::error::{CorralError, Result};
use nix::mount::{MsFlags, mount};

/// Directories making up one container's overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayout {
    /// Read-only image layer.
    pub lower: PathBuf,
    /// Writable layer receiving every change.
    pub upper: PathBuf,
    /// Scratch directory required by `OverlayFS`.
    pub work: PathBuf,
    /// Merged view the container sees as `/`.
    pub merged: PathBuf,
}

impl OverlayLayout {
    /// Lays out the overlay of a container rooted at `container_dir`.
    #[must_use]
    pub fn new(container_dir: &Path, lower: PathBuf) -> Self {
        Self {
            lower,
            upper: container_dir.join(WRITE_LAYER_DIR),
            work: container_dir.join(WORK_DIR),
            merged: container_dir.join(MOUNT_DIR),
        }
    }

    /// Mount data string passed to `mount(2)`.
    #[must_use]
    pub fn options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.upper.display(),
            self.work.display()
        )
    }

    /// Creates the writable directories and mounts the overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the mount
    /// syscall fails.
    pub fn mount(&self) -> Result<()> {
        for dir in [&self.upper, &self.work, &self.merged] {
            std::fs::create_dir_all(dir).map_err(|e| CorralError::io(dir, e))?;
        }
        let opts = self.options();
        mount(
            Some("overlay"),
            &self.merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        )
        .map_err(|e| CorralError::resource(format!("overlay mount failed: {e}")))?;
        tracing::info!(merged = %self.merged.display(), lower = %self.lower.display(), "overlayfs mounted");
        Ok(())
    }

    /// Detaches the merged view and deletes the writable directories.
    ///
    /// Directories that are already gone are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if unmounting or deletion fails.
    pub fn unmount_and_remove(&self) -> Result<()> {
        super::mount::unmount(&self.merged)?;
        // Plain rmdir: a mount point that is somehow still populated must
        // not be recursed into.
        match std::fs::remove_dir(&self.merged) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(&self.merged, e)),
        }
        for dir in [&self.upper, &self.work] {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CorralError::io(dir, e)),
            }
        }
        tracing::info!(merged = %self.merged.display(), "overlayfs removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_lives_in_container_dir() {
        let layout = OverlayLayout::new(Path::new("/run/corral/abc"), PathBuf::from("/images/busybox"));
        assert_eq!(layout.upper, Path::new("/run/corral/abc/writelayer"));
        assert_eq!(layout.work, Path::new("/run/corral/abc/work"));
        assert_eq!(layout.merged, Path::new("/run/corral/abc/mnt"));
        assert_eq!(
            layout.options(),
            "lowerdir=/images/busybox,upperdir=/run/corral/abc/writelayer,workdir=/run/corral/abc/work"
        );
    }

    #[test]
    fn removal_tolerates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OverlayLayout::new(dir.path(), dir.path().join("lower"));
        std::fs::create_dir_all(layout.upper.join("etc")).unwrap();
        layout.unmount_and_remove().expect("remove");
        assert!(!layout.upper.exists());
        assert!(dir.path().exists());
    }
}
