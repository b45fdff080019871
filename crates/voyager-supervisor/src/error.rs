//! Supervisor error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Error code the UI uses to offer a node retry
pub const NO_NODES_AVAILABLE: &str = "NO_NODES_AVAILABLE";

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The daemon wrote to stderr or exited before it reported healthy
    #[error("{0}")]
    DaemonStart(String),

    #[error("Can't start Gaia Lite because it's already running. Call stop_daemon first.")]
    DaemonAlreadyRunning,

    #[error("The data directory ({}) is missing {missing}", .root.display())]
    CorruptDataDirectory { root: PathBuf, missing: String },

    #[error("Data was created with an incompatible app version data={data} app={app}")]
    IncompatibleAppVersion { data: String, app: String },

    #[error(
        "The network you are trying to connect to requires gaia {expected}, but the version Voyager is using is {local}.{hint}"
    )]
    IncompatibleDaemonVersion {
        expected: String,
        local: String,
        hint: String,
    },

    #[error("No nodes available to connect to.")]
    NoNodesAvailable,

    /// Async failure of a daemon that had already reported healthy
    #[error("{0}")]
    DaemonCrash(String),

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid genesis file {}: {reason}", .path.display())]
    InvalidGenesis { path: PathBuf, reason: String },

    #[error("Failed to query node version: {0}")]
    NodeVersion(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// A stop request arrived while the daemon was still starting
    #[error("The daemon was stopped before it became ready")]
    StartAborted,
}

impl SupervisorError {
    /// Machine-readable code attached to the UI error payload
    pub fn code(&self) -> Option<&'static str> {
        match self {
            SupervisorError::NoNodesAvailable => Some(NO_NODES_AVAILABLE),
            _ => None,
        }
    }

    /// Whether the error aborts startup rather than leaving the supervisor
    /// waiting for a reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::CorruptDataDirectory { .. }
                | SupervisorError::IncompatibleAppVersion { .. }
                | SupervisorError::IncompatibleDaemonVersion { .. }
                | SupervisorError::InvalidGenesis { .. }
        )
    }
}
