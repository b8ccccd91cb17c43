//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root is detached entirely, so nothing of the
//! host tree stays reachable from inside the container.

use std::path::Path;

use corral_common::constants::PIVOT_STAGING_DIR;
use corral_common::error::{CorralError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::chdir;

/// Makes `new_root` the root of the calling mount namespace.
///
/// Mount propagation is made private first so nothing below leaks back to
/// the host. `new_root` is bind-mounted onto itself because `pivot_root`
/// requires the new root to be a mount point. The old root is parked in
/// `.pivot_root`, lazily detached, and the staging directory removed.
///
/// # Errors
///
/// Returns [`CorralError::Resource`] if any mount syscall fails, or an
/// I/O error for the staging directory.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let sys = |what: &str, e: nix::Error| CorralError::resource(format!("{what}: {e}"));

    mount(None::<&str>, "/", None::<&str>, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None::<&str>)
        .map_err(|e| sys("make / private", e))?;
    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys("bind new root onto itself", e))?;

    let staging = new_root.join(PIVOT_STAGING_DIR);
    std::fs::create_dir_all(&staging).map_err(|e| CorralError::io(&staging, e))?;
    nix::unistd::pivot_root(new_root, &staging).map_err(|e| sys("pivot_root", e))?;
    chdir("/").map_err(|e| sys("chdir to new root", e))?;

    let old_root = Path::new("/").join(PIVOT_STAGING_DIR);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| sys("detach old root", e))?;
    std::fs::remove_dir(&old_root).map_err(|e| CorralError::io(&old_root, e))?;

    tracing::info!(new_root = %new_root.display(), "root filesystem switched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::mount::{mount_dev, mount_proc};
    use nix::sched::{CloneFlags, unshare};
    use std::os::unix::fs::FileTypeExt;
    use std::process::Command;

    /// Set in the re-executed test binary that performs the switch.
    const NEW_ROOT_ENV: &str = "CORRAL_TEST_NEW_ROOT";

    #[test]
    #[ignore = "requires root"]
    fn switched_root_hides_host_and_gets_fresh_proc_and_dev() {
        if !nix::unistd::Uid::effective().is_root() {
            return;
        }
        if let Some(root) = std::env::var_os(NEW_ROOT_ENV) {
            // First process of a fresh PID namespace.
            assert_eq!(std::process::id(), 1);
            unshare(CloneFlags::CLONE_NEWNS).expect("unshare mount namespace");
            pivot_root(Path::new(&root)).expect("pivot_root");
            mount_proc(Path::new("/proc")).expect("mount proc");
            mount_dev(Path::new("/dev")).expect("mount dev");

            assert!(!Path::new("/").join(PIVOT_STAGING_DIR).exists());
            assert!(!Path::new(&root).exists());
            assert!(Path::new("/marker").exists());
            assert_eq!(std::fs::read_link("/proc/self").unwrap(), Path::new("1"));
            let null = std::fs::metadata("/dev/null").unwrap();
            assert!(null.file_type().is_char_device());
            return;
        }

        let root = tempfile::tempdir().expect("tempdir");
        std::fs::write(root.path().join("marker"), "inside").unwrap();
        unshare(CloneFlags::CLONE_NEWPID).expect("unshare pid namespace");

        let test = concat!(module_path!(), "::switched_root_hides_host_and_gets_fresh_proc_and_dev");
        let name = test.split_once("::").map_or(test, |(_, rest)| rest);
        let status = Command::new(std::env::current_exe().unwrap())
            .args([name, "--exact", "--ignored", "--test-threads=1", "--nocapture"])
            .env(NEW_ROOT_ENV, root.path())
            .status()
            .expect("re-exec test binary");
        assert!(status.success(), "switched child failed: {status}");
        assert!(!root.path().join(PIVOT_STAGING_DIR).exists());
    }
}
