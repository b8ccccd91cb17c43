//! Image layers stored as plain directories or tar archives.
//!
//! An image named `busybox` lives at `{image_dir}/busybox`. When only
//! `busybox.tar.gz` or `busybox.tar` exists, it is unpacked into that
//! directory on first use. Committed containers are written back in the
//! same `.tar.gz` form.

use std::fs::File;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Archive suffixes probed when an image directory is missing, in order.
const ARCHIVE_SUFFIXES: [&str; 3] = ["tar.gz", "tgz", "tar"];

/// Returns the read-only layer directory for `image`, unpacking its
/// archive first when only the archive is present.
///
/// # Errors
///
/// Returns [`CorralError::NotFound`] if neither a directory nor an archive
/// exists, or an I/O error if unpacking fails.
pub fn resolve(image_dir: &Path, image: &str) -> Result<PathBuf> {
    if image.is_empty() || image.contains('/') {
        return Err(CorralError::config(format!("invalid image name {image:?}")));
    }
    let layer = image_dir.join(image);
    if layer.is_dir() {
        return Ok(layer);
    }
    let archive = ARCHIVE_SUFFIXES
        .iter()
        .map(|suffix| image_dir.join(format!("{image}.{suffix}")))
        .find(|p| p.is_file())
        .ok_or_else(|| CorralError::NotFound {
            kind: "image",
            id: image.to_string(),
        })?;
    extract(&archive, &layer)?;
    Ok(layer)
}

/// Unpacks a tar archive into `target`.
///
/// Gzip compression is detected from the `.gz` / `.tgz` extension.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked. A partially
/// unpacked target is removed.
pub fn extract(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "unpacking image"
    );
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    let file = File::open(archive_path).map_err(|e| CorralError::io(archive_path, e))?;

    let unpacked = if is_gzip(archive_path) {
        tar::Archive::new(GzDecoder::new(file)).unpack(target)
    } else {
        tar::Archive::new(file).unpack(target)
    };
    if let Err(e) = unpacked {
        let _ = std::fs::remove_dir_all(target);
        return Err(CorralError::io(archive_path, e));
    }
    Ok(())
}

/// Archives the contents of `root` into a gzip-compressed tarball at `dest`.
///
/// Symlinks are stored as links, not followed.
///
/// # Errors
///
/// Returns an error if `root` cannot be walked or `dest` cannot be written.
pub fn archive(root: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
    }
    let file = File::create(dest).map_err(|e| CorralError::io(dest, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", root)
        .map_err(|e| CorralError::io(root, e))?;
    let encoder = builder.into_inner().map_err(|e| CorralError::io(dest, e))?;
    encoder.finish().map_err(|e| CorralError::io(dest, e))?;
    tracing::info!(root = %root.display(), dest = %dest.display(), "root filesystem archived");
    Ok(())
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root(dir: &Path) -> PathBuf {
        let root = dir.join("root");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin/hello"), "#!/bin/sh\necho hi\n").unwrap();
        std::os::unix::fs::symlink("hello", root.join("bin/hi")).unwrap();
        root
    }

    #[test]
    fn archived_root_resolves_as_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = sample_root(dir.path());
        let images = dir.path().join("images");

        archive(&root, &images.join("snap.tar.gz")).expect("archive");
        let layer = resolve(&images, "snap").expect("resolve");

        assert_eq!(layer, images.join("snap"));
        assert_eq!(
            std::fs::read_to_string(layer.join("bin/hello")).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
        assert_eq!(
            std::fs::read_link(layer.join("bin/hi")).unwrap(),
            Path::new("hello")
        );
    }

    #[test]
    fn existing_directory_wins_over_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("busybox")).unwrap();
        std::fs::write(dir.path().join("busybox.tar"), b"not a tar").unwrap();
        assert_eq!(
            resolve(dir.path(), "busybox").unwrap(),
            dir.path().join("busybox")
        );
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve(dir.path(), "ghost").expect_err("missing");
        assert!(matches!(err, CorralError::NotFound { kind: "image", .. }));
    }

    #[test]
    fn corrupt_archive_leaves_no_layer_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bad.tar.gz"), b"garbage").unwrap();
        assert!(resolve(dir.path(), "bad").is_err());
        assert!(!dir.path().join("bad").exists());
    }

    #[test]
    fn path_like_image_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            resolve(dir.path(), "../etc").unwrap_err(),
            CorralError::Config { .. }
        ));
    }
}
