//! Unified error type for the Corral workspace.
//!
//! Every library crate returns [`Result`]. The CLI maps each variant to a
//! stable process exit code through [`CorralError::exit_code`].

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or command argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A container, network, or configuration record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("{kind} {id} is {actual}, expected {expected}")]
    InvalidState {
        /// Type of the resource.
        kind: &'static str,
        /// Identifier of the resource.
        id: String,
        /// State the operation requires.
        expected: String,
        /// State the resource is actually in.
        actual: String,
    },

    /// A mount, cgroup-file, namespace, or link-layer syscall failed.
    #[error("resource error: {message}")]
    Resource {
        /// Description of the failed operation.
        message: String,
    },

    /// Every address of a subnet is already allocated.
    #[error("no free address left in subnet {subnet}")]
    AllocationExhausted {
        /// Subnet in CIDR notation.
        subnet: String,
    },

    /// A shelled-out command exited unsuccessfully.
    #[error("{program} {args} failed ({status}): {stderr}")]
    ExternalTool {
        /// Program that was invoked.
        program: String,
        /// Space-joined arguments, for diagnostics only.
        args: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CorralError::Resource`] from a message.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Builds a [`CorralError::Config`] from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// | code | meaning                          |
    /// |------|----------------------------------|
    /// | 1    | I/O or serialization failure     |
    /// | 2    | invalid configuration or usage   |
    /// | 3    | record not found                 |
    /// | 4    | wrong lifecycle state            |
    /// | 5    | kernel resource failure          |
    /// | 6    | address pool exhausted           |
    /// | 7    | external tool failed             |
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Io { .. } | Self::Serialization { .. } => 1,
            Self::Config { .. } => 2,
            Self::NotFound { .. } => 3,
            Self::InvalidState { .. } => 4,
            Self::Resource { .. } => 5,
            Self::AllocationExhausted { .. } => 6,
            Self::ExternalTool { .. } => 7,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
