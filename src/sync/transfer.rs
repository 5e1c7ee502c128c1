//! Remote mirroring via rsync.
//!
//! Each transfer shells out to the system `rsync` with `--delete`, so the
//! remote directory converges to the local one even after deletions. The
//! [`Transfer`] trait is the seam the trigger layer works against; tests
//! substitute a recording implementation.

use std::ffi::OsString;
use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{Connection, RemoteTarget};
use crate::paths;

/// Errors of a single mirroring attempt.
#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    /// rsync could not be started at all.
    #[error("failed to run rsync: {0}")]
    Spawn(#[from] std::io::Error),

    /// rsync ran but reported failure.
    #[error("rsync exited with {status}")]
    Failed {
        /// Exit status rsync finished with.
        status: ExitStatus,
    },
}

/// Capability to mirror one local directory to one remote destination.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Mirror the contents of `local_dir` to `remote`, at offset `rel`
    /// below the remote root.
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer could not be started or did not
    /// complete cleanly.
    async fn mirror(
        &self,
        local_dir: &Path,
        remote: &RemoteTarget,
        rel: &Path,
    ) -> Result<(), TransferError>;
}

/// Production transfer that invokes the system rsync binary.
#[derive(Debug, Default)]
pub struct RsyncTransfer;

#[async_trait]
impl Transfer for RsyncTransfer {
    async fn mirror(
        &self,
        local_dir: &Path,
        remote: &RemoteTarget,
        rel: &Path,
    ) -> Result<(), TransferError> {
        let args = rsync_args(local_dir, remote, rel);
        tracing::debug!(
            source = %local_dir.display(),
            destination = %remote.describe(),
            "running rsync"
        );
        let status = Command::new("rsync").args(&args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(TransferError::Failed { status })
        }
    }
}

/// Build the full rsync argument vector for one transfer.
fn rsync_args(local_dir: &Path, remote: &RemoteTarget, rel: &Path) -> Vec<OsString> {
    let mut args = vec![OsString::from("-azq"), OsString::from("--delete")];
    if let Connection::Ssh {
        identity_file_path: Some(identity),
        ..
    } = &remote.connection
    {
        args.push(OsString::from("-e"));
        let mut shell = OsString::from("ssh -i ");
        shell.push(identity);
        args.push(shell);
    }
    args.push(paths::rsync_source(local_dir));
    args.push(destination(remote, rel));
    args
}

/// Format the rsync destination for one remote at the given offset.
///
/// Without a username the transport connects as the invoking user (ssh) or
/// anonymously (rsync daemon).
fn destination(remote: &RemoteTarget, rel: &Path) -> OsString {
    let (prefix, remote_root) = match &remote.connection {
        Connection::Ssh {
            username, hostname, ..
        } => (
            match username {
                Some(user) => format!("{user}@{hostname}:"),
                None => format!("{hostname}:"),
            },
            remote.root.as_str(),
        ),
        Connection::SshHostAlias { ssh_host_alias } => {
            (format!("{ssh_host_alias}:"), remote.root.as_str())
        }
        Connection::RsyncDaemon {
            username,
            hostname,
            port,
        } => {
            let account = match username {
                Some(user) => format!("{user}@{hostname}"),
                None => hostname.clone(),
            };
            match port {
                // URL syntax, module path without its leading slash.
                Some(port) => (
                    format!("rsync://{account}:{port}/"),
                    remote.root.trim_start_matches('/'),
                ),
                None => (format!("{account}::"), remote.root.as_str()),
            }
        }
    };
    let mut dest = OsString::from(prefix);
    dest.push(paths::join_remote(remote_root, rel));
    dest
}
