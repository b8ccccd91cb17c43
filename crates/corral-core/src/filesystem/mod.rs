//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` layer management, `pivot_root` for switching the
//! root filesystem, pseudo-filesystem mounts, and the workspace that
//! assembles a container root from an image.

pub mod image;
pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
pub mod workspace;

pub use workspace::{OverlayWorkspace, Volume, Workspace};
