//! Fan-out of one local change to every configured remote.
//!
//! Failures are per-remote: a destination that is down gets a warning and
//! the remaining destinations are still attempted. The watch engine never
//! sees transfer errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RemoteTarget;
use crate::paths;

use super::transfer::Transfer;

/// Dispatches directory syncs for one workspace to all of its remotes.
pub struct SyncTrigger {
    workspace_root: PathBuf,
    remotes: Vec<RemoteTarget>,
    transfer: Arc<dyn Transfer>,
}

impl SyncTrigger {
    /// Create a trigger for one workspace.
    #[must_use]
    pub fn new(
        workspace_root: PathBuf,
        remotes: Vec<RemoteTarget>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        Self {
            workspace_root,
            remotes,
            transfer,
        }
    }

    /// Mirror the directory at `rel` (workspace-relative, empty for the
    /// root) to every remote, in configuration order.
    pub async fn sync(&self, rel: &Path) {
        let local_dir = paths::join_relative(&self.workspace_root, rel);
        for remote in &self.remotes {
            if let Err(e) = self.transfer.mirror(&local_dir, remote, rel).await {
                tracing::warn!(
                    directory = %local_dir.display(),
                    destination = %remote.describe(),
                    error = %e,
                    "sync failed"
                );
            } else {
                tracing::debug!(
                    directory = %local_dir.display(),
                    destination = %remote.describe(),
                    "synced"
                );
            }
        }
    }
}
