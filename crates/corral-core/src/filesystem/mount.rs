//! Mount utilities for container filesystem setup.
//!
//! Handles `/proc`, a minimal `/dev`, and bind mounts inside the
//! container's mount namespace.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};

/// Character devices created in a fresh `/dev`: name, major, minor.
const DEVICES: [(&str, u64, u64); 6] = [
    ("null", 1, 3),
    ("zero", 1, 5),
    ("full", 1, 7),
    ("random", 1, 8),
    ("urandom", 1, 9),
    ("tty", 5, 0),
];

/// Convenience links created in a fresh `/dev`: name, target.
const FD_LINKS: [(&str, &str); 4] = [
    ("fd", "/proc/self/fd"),
    ("stdin", "/proc/self/fd/0"),
    ("stdout", "/proc/self/fd/1"),
    ("stderr", "/proc/self/fd/2"),
];

/// Mounts a fresh `proc` on `target`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or `mount(2)` fails.
pub fn mount_proc(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| CorralError::resource(format!("mount proc on {}: {e}", target.display())))?;
    tracing::debug!(target = %target.display(), "proc mounted");
    Ok(())
}

/// Mounts a `tmpfs` on `target` and populates it with the basic devices.
///
/// # Errors
///
/// Returns an error if the mount or any device node creation fails.
pub fn mount_dev(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| CorralError::resource(format!("mount tmpfs on {}: {e}", target.display())))?;
    create_device_nodes(target)?;
    link_std_fds(target)?;
    tracing::debug!(target = %target.display(), "dev populated");
    Ok(())
}

/// Creates the character devices listed in [`DEVICES`] under `dev`.
///
/// # Errors
///
/// Returns an error if `mknod(2)` fails, typically for lack of `CAP_MKNOD`.
pub fn create_device_nodes(dev: &Path) -> Result<()> {
    let mode = Mode::from_bits_truncate(0o666);
    for (name, major, minor) in DEVICES {
        let node = dev.join(name);
        mknod(&node, SFlag::S_IFCHR, mode, makedev(major, minor))
            .map_err(|e| CorralError::resource(format!("mknod {}: {e}", node.display())))?;
    }
    Ok(())
}

/// Creates the `fd`, `stdin`, `stdout`, and `stderr` links under `dev`.
///
/// # Errors
///
/// Returns an error if a link cannot be created.
pub fn link_std_fds(dev: &Path) -> Result<()> {
    for (name, target) in FD_LINKS {
        let link = dev.join(name);
        std::os::unix::fs::symlink(target, &link).map_err(|e| CorralError::io(&link, e))?;
    }
    Ok(())
}

/// Recursively bind-mounts `source` onto `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| {
        CorralError::resource(format!(
            "bind {} onto {}: {e}",
            source.display(),
            target.display()
        ))
    })?;
    tracing::debug!(source = %source.display(), target = %target.display(), "bind mount created");
    Ok(())
}

/// Lazily detaches whatever is mounted on `target`.
///
/// A path with nothing mounted on it, or that no longer exists, is left
/// alone.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or `umount2(2)`
/// fails.
pub fn unmount(target: &Path) -> Result<()> {
    if !is_mount_point(target)? {
        return Ok(());
    }
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "unmounted");
            Ok(())
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(()),
        Err(e) => Err(CorralError::resource(format!(
            "unmount {}: {e}",
            target.display()
        ))),
    }
}

/// Returns whether `target` appears as a mount point in the live table.
///
/// # Errors
///
/// Returns an error if `/proc/self/mountinfo` cannot be read.
pub fn is_mount_point(target: &Path) -> Result<bool> {
    is_mount_point_in(Path::new(crate::cgroup::mountinfo::PROC_MOUNTINFO), target)
}

/// Returns whether `target` appears as a mount point in the mountinfo
/// file at `table`.
///
/// # Errors
///
/// Returns an error if `table` cannot be read.
pub fn is_mount_point_in(table: &Path, target: &Path) -> Result<bool> {
    let Ok(target) = target.canonicalize() else {
        return Ok(false);
    };
    let content = std::fs::read_to_string(table).map_err(|e| CorralError::io(table, e))?;
    Ok(content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| Path::new(mount_point) == target))
}
