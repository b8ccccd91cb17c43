//! # corral-runtime
//!
//! Container lifecycle management for the Corral runtime.
//!
//! - **Launcher**: clones init into fresh namespaces and hands it the
//!   command over a pipe.
//! - **Init**: pivots into the container root and execs the command.
//! - **Store**: one `config.json` per container directory.
//! - **Engine**: create, stop, remove, list, logs, exec, and commit, with
//!   compensating teardown when create fails halfway.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod commit;
pub mod container;
pub mod engine;
pub mod exec;
pub mod handoff;
pub mod init;
pub mod launcher;
pub mod logs;
pub mod state;

pub use container::{ContainerInfo, RunOptions};
pub use engine::{Created, Engine};
