//! Container lifecycle orchestration.
//!
//! Ties the workspace, the launcher, the cgroup manager, and the network
//! registry together. Every public operation is one CLI invocation; state
//! between invocations lives only in the metadata store.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use corral_common::config::CorralConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus, PortMapping, non_blank};
use corral_core::cgroup::CgroupManager;
use corral_core::filesystem::{OverlayWorkspace, Volume, Workspace};
use corral_core::namespace::NamespaceConfig;
use corral_core::signal;
use corral_network::{Endpoint, NetworkRegistry};

use crate::container::{ContainerInfo, RunOptions};
use crate::handoff;
use crate::launcher::{self, LaunchSpec};
use crate::state::ContainerStore;
use crate::{commit, exec, logs};

/// Result of [`Engine::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Id of the new container.
    pub id: ContainerId,
    /// Exit code of a foreground container; `None` when detached.
    pub exit_code: Option<i32>,
}

/// Address a container holds on a network.
#[derive(Debug, Clone)]
struct Attachment {
    network: String,
    ip: Ipv4Addr,
    port_mappings: Vec<PortMapping>,
}

/// Everything acquired so far by a create, undone in reverse on failure.
#[derive(Debug, Default)]
struct Provisioned {
    workspace: bool,
    pid: Option<u32>,
    cgroup: Option<CgroupManager>,
    attachment: Option<Attachment>,
}

/// Drives containers through their lifecycle.
#[derive(Debug)]
pub struct Engine<W: Workspace = OverlayWorkspace> {
    config: CorralConfig,
    store: ContainerStore,
    workspace: W,
    mountinfo: Option<PathBuf>,
}

impl Engine {
    /// Creates an engine using overlay workspaces.
    #[must_use]
    pub fn new(config: CorralConfig) -> Self {
        let workspace = OverlayWorkspace::from_config(&config);
        Self::with_workspace(config, workspace)
    }
}

impl<W: Workspace> Engine<W> {
    /// Creates an engine with a custom root filesystem provider.
    #[must_use]
    pub fn with_workspace(config: CorralConfig, workspace: W) -> Self {
        Self {
            store: ContainerStore::new(config.container_root.clone()),
            config,
            workspace,
            mountinfo: None,
        }
    }

    /// Reads cgroup and root filesystem mount points from `path` instead
    /// of the live table.
    #[must_use]
    pub fn with_mountinfo(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.store = self.store.with_mountinfo(&path);
        self.mountinfo = Some(path);
        self
    }

    /// The metadata store.
    pub const fn store(&self) -> &ContainerStore {
        &self.store
    }

    /// Creates and starts a container.
    ///
    /// A foreground container is waited for and cleaned up before this
    /// returns; a detached one keeps running. If any step fails, everything
    /// acquired so far is released and the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty command or malformed
    /// volume, or the error of the first failing step.
    pub fn create(&self, options: &RunOptions) -> Result<Created> {
        if options.command.is_empty() {
            return Err(CorralError::config("a command is required"));
        }
        let volume: Option<Volume> = non_blank(options.volume.as_deref())
            .map(str::parse)
            .transpose()?;

        let id = ContainerId::generate();
        let mut progress = Provisioned::default();
        let pid = match self.provision(&id, options, volume.as_ref(), &mut progress) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "create failed, rolling back");
                self.rollback(&id, volume.as_ref(), progress);
                return Err(e);
            }
        };
        tracing::info!(id = %id, pid, image = %options.image, detached = !options.tty, "container started");

        if !options.tty {
            return Ok(Created { id, exit_code: None });
        }
        let waited = launcher::wait(pid);
        self.finish_foreground(&id, volume.as_ref(), progress);
        let code = waited?;
        tracing::info!(id = %id, code, "container exited");
        Ok(Created {
            id,
            exit_code: Some(code),
        })
    }

    fn provision(
        &self,
        id: &ContainerId,
        options: &RunOptions,
        volume: Option<&Volume>,
        progress: &mut Provisioned,
    ) -> Result<u32> {
        let root = self.workspace.ensure(id, &options.image, volume)?;
        progress.workspace = true;

        let launched = launcher::launch(&LaunchSpec {
            root,
            log_file: (!options.tty).then(|| self.store.log_path(id)),
            namespaces: NamespaceConfig::default(),
        })?;
        let pid = launched.pid;
        progress.pid = Some(pid);

        let mut info = ContainerInfo::running(id.clone(), pid, options);
        self.store.save(&info)?;

        let mut cgroup = self.cgroup(id);
        progress.cgroup = Some(cgroup.clone());
        cgroup.set(options.resources.clone())?;
        cgroup.apply(pid)?;

        if let Some(network) = non_blank(options.network.as_deref()) {
            let registry = NetworkRegistry::open(&self.config)?;
            let endpoint = registry.connect(network, id, pid, &options.port_mappings)?;
            progress.attachment = Some(Attachment {
                network: network.to_string(),
                ip: endpoint.ip,
                port_mappings: endpoint.port_mappings.clone(),
            });
            info.network = Some(network.to_string());
            info.ip = Some(endpoint.ip.to_string());
            self.store.save(&info)?;
        }

        handoff::send(launched.writer, &options.command)?;
        Ok(pid)
    }

    /// Undoes a partial create in reverse order. Failures are only logged
    /// so the original error reaches the caller.
    fn rollback(&self, id: &ContainerId, volume: Option<&Volume>, progress: Provisioned) {
        if let Some(pid) = progress.pid {
            match signal::terminate(pid, self.config.drain_grace()) {
                Ok(_) => {
                    let _ = launcher::wait(pid);
                }
                Err(e) => tracing::warn!(id = %id, pid, error = %e, "rollback: could not kill init"),
            }
        }
        if let Some(cgroup) = progress.cgroup {
            if let Err(e) = cgroup.destroy() {
                tracing::warn!(id = %id, error = %e, "rollback: cgroup removal failed");
            }
        }
        if let Some(attachment) = progress.attachment {
            self.release(id, &attachment);
        }
        if progress.workspace {
            if let Err(e) = self.workspace.teardown(id, volume) {
                tracing::warn!(id = %id, error = %e, "rollback: workspace teardown failed, keeping container directory");
                return;
            }
        }
        // The container directory may hold a log even before metadata exists.
        if let Err(e) = self.store.delete(id) {
            tracing::warn!(id = %id, error = %e, "rollback: container directory removal failed");
        }
    }

    /// Cleans up after a foreground container has exited.
    fn finish_foreground(&self, id: &ContainerId, volume: Option<&Volume>, progress: Provisioned) {
        match self.workspace.teardown(id, volume) {
            Ok(()) => {
                if let Err(e) = self.store.delete(id) {
                    tracing::warn!(id = %id, error = %e, "metadata removal failed");
                }
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "workspace teardown failed, keeping container directory"),
        }
        if let Some(cgroup) = progress.cgroup {
            if let Err(e) = cgroup.destroy() {
                tracing::warn!(id = %id, error = %e, "cgroup removal failed");
            }
        }
        if let Some(attachment) = progress.attachment {
            self.release(id, &attachment);
        }
    }

    fn release(&self, id: &ContainerId, attachment: &Attachment) {
        let released = NetworkRegistry::open(&self.config).and_then(|registry| {
            let endpoint = Endpoint::new(id, &attachment.network, attachment.ip, attachment.port_mappings.clone());
            registry.disconnect(&endpoint)?;
            registry.release(&attachment.network, attachment.ip, &attachment.port_mappings)
        });
        if let Err(e) = released {
            tracing::warn!(id = %id, network = %attachment.network, ip = %attachment.ip, error = %e, "address release failed");
        }
    }

    fn cgroup(&self, id: &ContainerId) -> CgroupManager {
        let cgroup = CgroupManager::new(self.config.cgroup_path(id.as_str()))
            .with_drain_grace(self.config.drain_grace());
        match &self.mountinfo {
            Some(path) => cgroup.with_mountinfo(path),
            None => cgroup,
        }
    }

    /// Stops a running container and releases its cgroups and root
    /// filesystem. The metadata is kept until [`remove`](Self::remove).
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// running, or the first teardown error.
    pub fn stop(&self, key: &str) -> Result<ContainerInfo> {
        let mut info = self.store.resolve(key)?;
        info.require(ContainerStatus::Running)?;

        if let Some(pid) = info.pid() {
            if !signal::terminate(pid, self.config.stop_grace())? {
                tracing::warn!(id = %info.id, pid, "init survived SIGKILL");
            }
        }
        info.mark_stopped();
        self.store.save(&info)?;

        self.cgroup(&info.id).destroy()?;
        self.workspace.teardown(&info.id, info.volume()?.as_ref())?;
        tracing::info!(id = %info.id, name = %info.name, "container stopped");
        Ok(info)
    }

    /// Deletes a stopped container's metadata and returns its address.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// stopped, or an error if its directory cannot be removed.
    pub fn remove(&self, key: &str) -> Result<()> {
        let info = self.store.resolve(key)?;
        info.require(ContainerStatus::Stop)?;

        if let (Some(network), Some(ip)) = (info.network.as_deref(), info.ip.as_deref()) {
            match ip.parse::<Ipv4Addr>() {
                Ok(ip) => self.release(
                    &info.id,
                    &Attachment {
                        network: network.to_string(),
                        ip,
                        port_mappings: info.port_mappings()?,
                    },
                ),
                Err(e) => tracing::warn!(id = %info.id, ip, error = %e, "recorded address is malformed"),
            }
        }
        self.workspace.teardown(&info.id, info.volume()?.as_ref())?;
        self.store.delete(&info.id)?;
        tracing::info!(id = %info.id, name = %info.name, "container removed");
        Ok(())
    }

    /// Every known container, oldest first.
    ///
    /// # Errors
    ///
    /// See [`ContainerStore::list`].
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        self.store.list()
    }

    /// Output captured from a detached container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown container, or an
    /// error if the log cannot be read.
    pub fn logs(&self, key: &str) -> Result<String> {
        let info = self.store.resolve(key)?;
        logs::read(&self.store.log_path(&info.id))
    }

    /// Runs `command` inside a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// running, or the exec error.
    pub fn exec(&self, key: &str, command: &[String]) -> Result<i32> {
        let info = self.store.resolve(key)?;
        info.require(ContainerStatus::Running)?;
        let pid = info.pid().ok_or_else(|| CorralError::InvalidState {
            kind: "container",
            id: info.id.to_string(),
            expected: "a recorded pid".into(),
            actual: "none".into(),
        })?;
        exec::exec_in(pid, command)
    }

    /// Archives a running container's root into a new image.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] unless the container is
    /// running, or the archiving error.
    pub fn commit(&self, key: &str, image: &str) -> Result<PathBuf> {
        let info = self.store.resolve(key)?;
        info.require(ContainerStatus::Running)?;
        commit::commit(&self.workspace.root(&info.id), &self.config.image_dir, image)
    }
}
