//! Spawning and terminating per-workspace watcher processes.
//!
//! The daemon does not watch directories itself; it runs one child process
//! per workspace (`wsmirror watch <spec-json>`) so a crash in one watcher
//! cannot take the others down. The child receives its full workspace
//! description as a single JSON argument.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::WorkspaceSpec;

/// Exit code a watcher uses to report that its workspace root no longer
/// exists. The daemon reacts by dropping the workspace from the
/// configuration instead of restarting the watcher.
pub const EXIT_WORKSPACE_GONE: i32 = 3;

/// Errors spawning a watcher process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The daemon's own executable path could not be determined.
    #[error("failed to locate own executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    /// The workspace description could not be encoded for the child.
    #[error("failed to encode workspace description: {0}")]
    Encode(#[from] serde_json::Error),

    /// The child process could not be started.
    #[error("failed to spawn watcher for '{root}': {source}")]
    Spawn {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A running watcher child process.
#[derive(Debug)]
pub struct WatcherProcess {
    root: PathBuf,
    child: Child,
}

impl WatcherProcess {
    /// Start a watcher for the given workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable cannot be located or the child
    /// cannot be spawned.
    pub fn spawn(workspace: &WorkspaceSpec) -> Result<Self, SpawnError> {
        let exe = std::env::current_exe().map_err(SpawnError::CurrentExe)?;
        let spec_json = serde_json::to_string(workspace)?;
        let child = Command::new(exe)
            .arg("watch")
            .arg(&spec_json)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                root: workspace.root.clone(),
                source,
            })?;
        tracing::info!(
            root = %workspace.root.display(),
            pid = child.id(),
            "watcher started"
        );
        Ok(Self {
            root: workspace.root.clone(),
            child,
        })
    }

    /// Workspace root this watcher covers.
    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// OS process id, if the child is still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the watcher to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the child fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.child.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            let wait_result = tokio::time::timeout(timeout, self.child.wait()).await;

            match wait_result {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => self.child.kill().await,
            }
        } else {
            // Already exited.
            Ok(())
        }
    }
}
