//! Container metadata as persisted in `config.json`.

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus, PortMapping, ResourceConfig, non_blank};
use corral_core::filesystem::Volume;
use serde::{Deserialize, Serialize};

/// Format of [`ContainerInfo::create_time`].
const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attach to the terminal and wait for the container to exit.
    pub tty: bool,
    /// Display name; defaults to the generated id.
    pub name: Option<String>,
    /// Image the root filesystem is built from.
    pub image: String,
    /// Command and arguments run as the container's init.
    pub command: Vec<String>,
    /// Cgroup limits.
    pub resources: ResourceConfig,
    /// `hostDir:containerDir` bind mount.
    pub volume: Option<String>,
    /// Host ports forwarded to the container.
    pub port_mappings: Vec<PortMapping>,
    /// Network to connect to.
    pub network: Option<String>,
}

/// Persisted description of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Init pid on the host, blank once stopped.
    pub pid: String,
    /// Container id.
    pub id: ContainerId,
    /// Display name.
    pub name: String,
    /// Command joined by single spaces, for display only.
    pub command: String,
    /// Local creation time, `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// `hostDir:containerDir`, blank when there is none.
    #[serde(default)]
    pub volume: String,
    /// `host:container` port mappings.
    #[serde(default)]
    pub port_mapping: Vec<String>,
    /// Network the container is connected to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address allocated on [`network`](Self::network).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ContainerInfo {
    /// Metadata of a freshly launched container.
    #[must_use]
    pub fn running(id: ContainerId, pid: u32, options: &RunOptions) -> Self {
        Self {
            pid: pid.to_string(),
            name: options.name.clone().unwrap_or_else(|| id.to_string()),
            id,
            command: options.command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: options.volume.clone().unwrap_or_default(),
            port_mapping: options.port_mappings.iter().map(ToString::to_string).collect(),
            network: None,
            ip: None,
        }
    }

    /// Init pid, if the container is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid.trim().parse().ok()
    }

    /// Marks the container stopped.
    pub fn mark_stopped(&mut self) {
        self.status = ContainerStatus::Stop;
        self.pid.clear();
    }

    /// Fails unless the container is in `expected` status.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] on mismatch.
    pub fn require(&self, expected: ContainerStatus) -> Result<()> {
        if self.status == expected {
            return Ok(());
        }
        Err(CorralError::InvalidState {
            kind: "container",
            id: self.id.to_string(),
            expected: expected.to_string(),
            actual: self.status.to_string(),
        })
    }

    /// The parsed volume, if any.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the stored value is malformed.
    pub fn volume(&self) -> Result<Option<Volume>> {
        non_blank(Some(self.volume.as_str()))
            .map(str::parse)
            .transpose()
    }

    /// The parsed port mappings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a stored entry is malformed.
    pub fn port_mappings(&self) -> Result<Vec<PortMapping>> {
        self.port_mapping.iter().map(|m| m.parse()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            image: "busybox".into(),
            command: vec!["sh".into(), "-c".into(), "echo hi".into()],
            volume: Some("/srv:/data".into()),
            port_mappings: vec!["8080:80".parse().unwrap()],
            ..RunOptions::default()
        }
    }

    #[test]
    fn running_info_defaults_name_to_id() {
        let info = ContainerInfo::running(ContainerId::new("abc123"), 42, &options());
        assert_eq!(info.name, "abc123");
        assert_eq!(info.pid(), Some(42));
        assert_eq!(info.command, "sh -c echo hi");
        assert_eq!(info.port_mapping, vec!["8080:80"]);
        assert_eq!(info.create_time.len(), 19);
    }

    #[test]
    fn json_uses_legacy_field_names() {
        let info = ContainerInfo::running(ContainerId::new("abc123"), 42, &options());
        let value: serde_json::Value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["pid"], "42");
        assert_eq!(value["status"], "running");
        assert_eq!(value["portMapping"][0], "8080:80");
        assert!(value.get("createTime").is_some());
        assert!(value.get("network").is_none());
    }

    #[test]
    fn stop_blanks_pid_and_blocks_running_operations() {
        let mut info = ContainerInfo::running(ContainerId::new("abc123"), 42, &options());
        info.require(ContainerStatus::Running).unwrap();
        info.mark_stopped();
        assert_eq!(info.pid, "");
        assert_eq!(info.pid(), None);
        let err = info.require(ContainerStatus::Running).unwrap_err();
        assert_eq!(err.to_string(), "container abc123 is stop, expected running");
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn stored_volume_and_ports_parse_back() {
        let info = ContainerInfo::running(ContainerId::new("abc123"), 42, &options());
        assert_eq!(info.volume().unwrap().unwrap().to_string(), "/srv:/data");
        assert_eq!(info.port_mappings().unwrap()[0].host, 8080);

        let bare = ContainerInfo::running(ContainerId::new("x"), 1, &RunOptions::default());
        assert_eq!(bare.volume().unwrap(), None);
    }
}
