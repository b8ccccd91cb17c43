//! Creation of the namespace-isolated init process.
//!
//! The child is cloned straight into new UTS, PID, mount, network, and IPC
//! namespaces and re-executes the current binary as `corral init`. The
//! command it should run arrives later over a pipe, so the parent can
//! finish cgroup and network setup before anything user-controlled runs.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use corral_common::constants::{HANDOFF_FD, INIT_SUBCOMMAND};
use corral_common::error::{CorralError, Result};
use corral_core::namespace::NamespaceConfig;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// Stack handed to the cloned child; it only runs until `execv`.
const STACK_SIZE: usize = 1024 * 1024;

/// The binary re-executed as init.
const SELF_EXE: &str = "/proc/self/exe";

/// How to launch a container's init.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Mounted container root; becomes the child's working directory.
    pub root: PathBuf,
    /// Where stdout and stderr go. `None` inherits the caller's terminal.
    pub log_file: Option<PathBuf>,
    /// Namespaces to clone into.
    pub namespaces: NamespaceConfig,
}

/// A launched init process, blocked until its command is sent.
#[derive(Debug)]
pub struct Launched {
    /// Host pid of init.
    pub pid: u32,
    /// Write end of the handoff pipe.
    pub writer: File,
}

/// Clones init into fresh namespaces.
///
/// The log file and the pipe are created before cloning, so a failure
/// there leaves no child behind.
///
/// # Errors
///
/// Returns an error if the log file or pipe cannot be created or the clone
/// syscall fails (usually for lack of `CAP_SYS_ADMIN`).
pub fn launch(spec: &LaunchSpec) -> Result<Launched> {
    let log = spec.log_file.as_deref().map(open_log).transpose()?;
    let (read_end, write_end) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| CorralError::resource(format!("handoff pipe: {e}")))?;

    // Everything the child touches is prepared here; it must not allocate.
    let root = c_path(&spec.root)?;
    let exe = c_string(SELF_EXE)?;
    let argv = [exe.clone(), c_string(INIT_SUBCOMMAND)?];
    let pipe_fd = read_end.as_raw_fd();
    let log_fd = log.as_ref().map(AsRawFd::as_raw_fd);

    let mut stack = vec![0u8; STACK_SIZE];
    let child = Box::new(|| child_main(&root, pipe_fd, log_fd, &exe, &argv));
    // SAFETY: the child runs on its own stack and only performs
    // async-signal-safe syscalls (chdir, dup2, fcntl, execv) on data
    // prepared above before exec replaces its image.
    let pid = unsafe {
        clone(
            child,
            &mut stack,
            spec.namespaces.clone_flags(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| CorralError::resource(format!("clone init: {e}")))?;
    drop(read_end);

    let pid = pid_u32(pid)?;
    tracing::info!(pid, root = %spec.root.display(), detached = log.is_some(), "init launched");
    Ok(Launched {
        pid,
        writer: File::from(write_end),
    })
}

/// Runs in the cloned child. Returns only on failure.
fn child_main(root: &CString, pipe_fd: RawFd, log_fd: Option<RawFd>, exe: &CString, argv: &[CString]) -> isize {
    if nix::unistd::chdir(root.as_c_str()).is_err() {
        return 1;
    }
    // SAFETY: dup2 and fcntl only operate on descriptors this process owns.
    unsafe {
        if libc::dup2(pipe_fd, HANDOFF_FD) < 0 || libc::fcntl(HANDOFF_FD, libc::F_SETFD, 0) < 0 {
            return 1;
        }
        if let Some(log) = log_fd {
            if libc::dup2(log, libc::STDOUT_FILENO) < 0 || libc::dup2(log, libc::STDERR_FILENO) < 0 {
                return 1;
            }
        }
    }
    let _ = nix::unistd::execv(exe, argv);
    127
}

/// Opens a detached container's log for appending, creating it if needed.
fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CorralError::io(path, e))
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| CorralError::config(format!("path {} contains a NUL byte", path.display())))
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| CorralError::config(format!("{s:?} contains a NUL byte")))
}

fn pid_u32(pid: Pid) -> Result<u32> {
    u32::try_from(pid.as_raw()).map_err(|_| CorralError::resource(format!("clone returned invalid pid {pid}")))
}

/// Waits for a foreground init to exit and returns its exit code.
///
/// A signal death is reported as `128 + signo`, the shell convention.
///
/// # Errors
///
/// Returns an error if `waitpid(2)` fails.
pub fn wait(pid: u32) -> Result<i32> {
    use nix::sys::wait::{WaitStatus, waitpid};

    let target = Pid::from_raw(
        i32::try_from(pid).map_err(|_| CorralError::config(format!("invalid pid {pid}")))?,
    );
    loop {
        match waitpid(target, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) | Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(CorralError::resource(format!("waitpid {pid}: {e}"))),
        }
    }
}
