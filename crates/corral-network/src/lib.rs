//! # corral-network
//!
//! Container networking over a Linux bridge.
//!
//! - **IPAM**: a persisted first-fit bitmap per subnet, serialised by a
//!   file lock.
//! - **Bridge driver**: bridge links, veth pairs, masquerade.
//! - **Firewall**: `iptables` NAT and DNAT rules.
//! - **Registry**: the set of named networks on disk and the
//!   orchestration that connects a container to one of them.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod endpoint;
pub mod firewall;
pub mod ipam;
pub mod network;

pub use bridge::NetworkDriver;
pub use endpoint::{Endpoint, NetnsSwitch, ThreadNetns};
pub use ipam::Ipam;
pub use network::{Network, NetworkRegistry};
