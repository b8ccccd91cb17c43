//! # corral-core
//!
//! Low-level Linux isolation primitives for the Corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v1**: the closed `cpu` / `cpuset` / `memory` subsystem set,
//!   discovered from the live mount table.
//! - **Namespaces**: clone flags for new containers and a thread-pinned
//!   network namespace guard.
//! - **Filesystem**: `pivot_root`, pseudo-filesystem mounts, and the
//!   overlay workspace the container root is assembled from.
//! - **Processes**: graceful-then-forced termination.
//! - **Host commands**: a runner seam over `ip` and `iptables`.
//!
//! Every syscall goes through `nix`; this crate contains no `unsafe`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("corral-core requires Linux namespaces and cgroups");

pub mod cgroup;
pub mod command;
pub mod filesystem;
pub mod namespace;
pub mod signal;
