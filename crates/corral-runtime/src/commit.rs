//! Snapshotting a container's root filesystem into a new image.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_core::filesystem::image;

/// Suffix of committed images.
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Path a committed image named `name` is written to.
///
/// # Errors
///
/// Returns a configuration error when `name` is empty or contains a path
/// separator.
pub fn archive_path(image_dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(CorralError::config(format!("invalid image name {name:?}")));
    }
    Ok(image_dir.join(format!("{name}{ARCHIVE_SUFFIX}")))
}

/// Archives the mounted root at `root` into `{image_dir}/{name}.tar.gz`.
///
/// # Errors
///
/// Returns an error if the name is invalid, the root is not mounted, or
/// the archive cannot be written.
pub fn commit(root: &Path, image_dir: &Path, name: &str) -> Result<PathBuf> {
    let dest = archive_path(image_dir, name)?;
    if !root.is_dir() {
        return Err(CorralError::NotFound {
            kind: "container root",
            id: root.display().to_string(),
        });
    }
    image::archive(root, &dest)?;
    tracing::info!(image = name, path = %dest.display(), "image committed");
    Ok(dest)
}
