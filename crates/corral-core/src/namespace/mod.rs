//! Linux namespace management for container isolation.
//!
//! New containers get their namespaces from `clone(2)` flags; the parent
//! later borrows the child's network namespace through [`NetnsGuard`].

pub mod network;

use nix::sched::CloneFlags;

pub use network::NetnsGuard;

/// Which namespaces a new container is cloned into.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate hostname and domain name.
    pub uts: bool,
    /// Isolate the PID space; init becomes PID 1.
    pub pid: bool,
    /// Isolate the mount table.
    pub mount: bool,
    /// Isolate the network stack.
    pub network: bool,
    /// Isolate System V IPC and POSIX message queues.
    pub ipc: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            network: true,
            ipc: true,
        }
    }
}

impl NamespaceConfig {
    /// The `clone(2)` flags selecting these namespaces.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        for (enabled, flag) in [
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_isolates_everything_but_users() {
        let flags = NamespaceConfig::default().clone_flags();
        assert_eq!(
            flags,
            CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWPID
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWNET
                | CloneFlags::CLONE_NEWIPC
        );
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn disabled_namespaces_are_omitted() {
        let config = NamespaceConfig {
            network: false,
            ..NamespaceConfig::default()
        };
        assert!(!config.clone_flags().contains(CloneFlags::CLONE_NEWNET));
        assert!(config.clone_flags().contains(CloneFlags::CLONE_NEWPID));
    }
}
