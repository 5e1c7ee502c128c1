//! Persistent workspace configuration model.
//!
//! The on-disk format is a JSON array of workspace entries. Connection
//! details are tagged by `connection_type` with the type-specific fields
//! under `connection_information`, so each transport only carries the
//! fields it actually uses.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One mirrored workspace: a local root and where its copies live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    /// Absolute path of the local directory tree being mirrored.
    #[serde(rename = "local_workspace_root_path")]
    pub root: PathBuf,
    /// Destinations the workspace is mirrored to.
    #[serde(rename = "remote_systems")]
    pub remotes: Vec<RemoteTarget>,
}

/// One mirroring destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Absolute path of the mirror root on the remote side. For rsync
    /// daemon targets this is the module path.
    #[serde(rename = "remote_workspace_root_path")]
    pub root: String,
    /// How to reach the remote system.
    #[serde(flatten)]
    pub connection: Connection,
}

impl RemoteTarget {
    /// Short description of the destination for log messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.connection {
            Connection::Ssh {
                username, hostname, ..
            } => match username {
                Some(user) => format!("{user}@{hostname}:{}", self.root),
                None => format!("{hostname}:{}", self.root),
            },
            Connection::SshHostAlias { ssh_host_alias } => {
                format!("{ssh_host_alias}:{}", self.root)
            }
            Connection::RsyncDaemon {
                username, hostname, ..
            } => match username {
                Some(user) => format!("{user}@{hostname}::{}", self.root),
                None => format!("{hostname}::{}", self.root),
            },
        }
    }
}

/// Transport used to reach a remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "connection_type", content = "connection_information")]
pub enum Connection {
    /// rsync over ssh with explicit credentials.
    #[serde(rename = "SSH")]
    Ssh {
        /// Remote login; omitted to connect as the invoking user.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        hostname: String,
        /// Private key to pass to ssh; omitted to use the default identity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file_path: Option<PathBuf>,
    },
    /// rsync over ssh through an alias from the user's ssh config.
    #[serde(rename = "SSH_HOST_ALIAS")]
    SshHostAlias { ssh_host_alias: String },
    /// A remote rsync daemon.
    #[serde(rename = "RSYNC_DAEMON")]
    RsyncDaemon {
        /// Daemon login; omitted for anonymous modules.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        hostname: String,
        /// Daemon port; omitted to use the protocol default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}
