//! System-wide constants and default paths.

/// Per-container metadata and log directories live under this root.
pub const DEFAULT_CONTAINER_ROOT: &str = "/var/run/corral";

/// Directory holding one JSON file per network.
pub const DEFAULT_NETWORK_DIR: &str = "/var/lib/corral/network/network";

/// IPAM bitmap state file.
pub const DEFAULT_IPAM_FILE: &str = "/var/lib/corral/network/ipam/subnet.json";

/// Read-only image layers, one directory per image name.
pub const DEFAULT_IMAGE_DIR: &str = "/var/lib/corral/images";

/// Parent directory of every container cgroup, relative to each subsystem mount.
pub const DEFAULT_CGROUP_PARENT: &str = "corral";

/// Metadata file name inside a container directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Detached-mode log file name inside a container directory.
pub const LOG_FILE_NAME: &str = "container.log";

/// Overlay writable layer directory name inside a container directory.
pub const WRITE_LAYER_DIR: &str = "writelayer";

/// Overlay work directory name inside a container directory.
pub const WORK_DIR: &str = "work";

/// Merged root filesystem directory name inside a container directory.
pub const MOUNT_DIR: &str = "mnt";

/// Descriptor on which the init process reads its handoff message.
pub const HANDOFF_FD: i32 = 3;

/// Hidden subcommand the launcher re-executes to enter the init handoff.
pub const INIT_SUBCOMMAND: &str = "init";

/// Staging directory for the old root during `pivot_root`.
pub const PIVOT_STAGING_DIR: &str = ".pivot_root";

/// Prefix of the container-side veth name.
pub const CONTAINER_VETH_PREFIX: &str = "cif-";

/// The only network driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Grace period between SIGTERM and SIGKILL when stopping a container.
pub const DEFAULT_STOP_GRACE_MS: u64 = 2000;

/// Grace period per residual pid when draining a cgroup.
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 100;

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_ENV: &str = "CORRAL_CONFIG";

/// Application name used in CLI output.
pub const APP_NAME: &str = "corral";
