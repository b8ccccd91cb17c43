//! Domain primitive types used across the Corral workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorralError;

/// Length of a generated container ID.
const CONTAINER_ID_LEN: usize = 12;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID of twelve hex characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a container.
///
/// The only transition is `Running` to `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The container's init process has been launched.
    Running,
    /// The container has been stopped and may be removed.
    Stop,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Resource limits for a container.
///
/// Values are written verbatim into cgroup control files. A `None` or
/// blank value leaves the corresponding limit at the kernel default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory ceiling, e.g. `100m` or `104857600`.
    pub memory_limit: Option<String>,
    /// CPU share weight, e.g. `512`.
    pub cpu_share: Option<String>,
    /// CPU set list, e.g. `0-1`.
    pub cpu_set: Option<String>,
}

impl ResourceConfig {
    /// Returns whether no limit is configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.memory_limit, &self.cpu_share, &self.cpu_set]
            .iter()
            .all(|v| non_blank(v.as_deref()).is_none())
    }
}

/// Returns the trimmed value unless it is absent or blank.
#[must_use]
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A `hostPort:containerPort` forwarding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CorralError::config(format!("port mapping must be HOST:CONTAINER, got {s:?}"));
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host: host.trim().parse().map_err(|_| invalid())?,
            container: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}
