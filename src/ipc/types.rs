//! Command-socket message types.
//!
//! Requests mutate or inspect the daemon's workspace configuration; every
//! request gets exactly one response. Both directions are single JSON
//! lines.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{RemoteTarget, WorkspaceSpec};

/// A command sent from the client CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Register a new workspace and start watching it.
    AddWorkspace {
        /// Full workspace description including its first remotes.
        workspace: WorkspaceSpec,
    },
    /// Stop watching a workspace and forget it.
    RemoveWorkspace {
        /// Local root of the workspace to remove.
        root: PathBuf,
    },
    /// Add a destination to an existing workspace.
    AddRemoteSystem {
        /// Local root of the workspace to extend.
        root: PathBuf,
        /// The new destination.
        remote: RemoteTarget,
    },
    /// Remove a destination from a workspace.
    RemoveRemoteSystem {
        /// Local root of the workspace.
        root: PathBuf,
        /// Remote root path identifying the destination.
        remote_root: String,
    },
    /// Report the currently watched workspaces.
    Status,
}

/// The daemon's answer to one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// The command succeeded.
    Ok {
        /// Human-readable summary, shown by the client.
        message: String,
    },
    /// The command failed.
    Error {
        /// What went wrong, shown by the client.
        message: String,
    },
}

impl DaemonResponse {
    /// Success with a message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    /// Failure with a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Errors that can occur during IPC.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Failed to connect to or talk over the daemon socket.
    #[error("failed to reach daemon: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    /// The daemon socket does not exist.
    #[error("daemon not running (socket not found)")]
    DaemonNotRunning,

    /// The operation timed out.
    #[error("IPC timeout after {0}ms")]
    Timeout(u64),

    /// Failed to serialize or deserialize a message.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer closed the connection without a full response.
    #[error("invalid response from daemon")]
    InvalidResponse,
}
