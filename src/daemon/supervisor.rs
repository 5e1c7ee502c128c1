//! The daemon: owns the configuration, serves the command socket, and
//! keeps one watcher process alive per configured workspace.
//!
//! Watchers that die unexpectedly are restarted after a short delay. A
//! watcher that exits with [`EXIT_WORKSPACE_GONE`] reported that its root
//! directory no longer exists; the daemon then drops the workspace from
//! the configuration instead of restarting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ConfigStore, WorkspaceSpec};
use crate::ipc::{DaemonRequest, DaemonResponse, IpcError, IpcServer};

use super::spawn::{WatcherProcess, EXIT_WORKSPACE_GONE};

/// Pause before restarting a crashed watcher.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Grace period for a watcher to exit after SIGTERM.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors of the daemon run loop.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The configuration could not be loaded at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The command socket could not be set up.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Waiting for a shutdown signal failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

struct WatcherSlot {
    /// Distinguishes this slot from later ones for the same root, so a
    /// finished monitor never deregisters its successor.
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    /// Command handlers run on their own tasks; the lock keeps each
    /// load-modify-save of the configuration file atomic.
    store: Mutex<ConfigStore>,
    watchers: Mutex<HashMap<PathBuf, WatcherSlot>>,
    next_slot_id: std::sync::atomic::AtomicU64,
}

/// The wsmirror daemon.
pub struct Daemon {
    shared: Arc<Shared>,
    socket_path: PathBuf,
}

impl Daemon {
    /// Create a daemon over the given configuration store and command
    /// socket path.
    #[must_use]
    pub fn new(store: ConfigStore, socket_path: PathBuf) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(store),
                watchers: Mutex::new(HashMap::new()),
                next_slot_id: std::sync::atomic::AtomicU64::new(0),
            }),
            socket_path,
        }
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// Starts a watcher for every configured workspace, serves the command
    /// socket, and tears everything down on shutdown.
    ///
    /// # Errors
    ///
    /// Fails if the configuration cannot be loaded or the command socket
    /// cannot be bound.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let workspaces = {
            let store = self.shared.store.lock().await;
            let workspaces = store.load()?;
            tracing::info!(
                config = %store.path().display(),
                workspaces = workspaces.len(),
                "daemon starting"
            );
            workspaces
        };
        for workspace in workspaces {
            start_watcher(&self.shared, workspace).await;
        }

        let shared = Arc::clone(&self.shared);
        let server = IpcServer::new(&self.socket_path);
        let handle = server.start(move |request| {
            let shared = Arc::clone(&shared);
            async move { handle_request(&shared, request).await }
        })?;

        wait_for_shutdown_signal().await.map_err(DaemonError::Signal)?;
        tracing::info!("shutdown signal received");

        handle.shutdown();
        self.stop_all_watchers().await;
        Ok(())
    }

    async fn stop_all_watchers(&self) {
        let slots: Vec<(PathBuf, WatcherSlot)> = {
            let mut watchers = self.shared.watchers.lock().await;
            watchers.drain().collect()
        };
        for (root, slot) in slots {
            tracing::info!(root = %root.display(), "stopping watcher");
            slot.cancel.cancel();
            if let Err(e) = slot.task.await {
                tracing::warn!(root = %root.display(), error = %e, "watcher task panicked");
            }
        }
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Launch a monitor task that keeps one watcher process alive.
async fn start_watcher(shared: &Arc<Shared>, workspace: WorkspaceSpec) {
    let root = workspace.root.clone();
    let id = shared
        .next_slot_id
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task_shared = Arc::clone(shared);
    let task_workspace = workspace;

    let task = tokio::spawn(async move {
        monitor_watcher(task_shared, task_workspace, id, task_cancel).await;
    });

    let mut watchers = shared.watchers.lock().await;
    if let Some(previous) = watchers.insert(root.clone(), WatcherSlot { id, cancel, task }) {
        // Replaced while still tracked; make sure the old monitor stops.
        previous.cancel.cancel();
    }
    drop(watchers);
    tracing::debug!(root = %root.display(), "watcher monitor registered");
}

/// Stop and forget the watcher for `root`, if one is running.
async fn stop_watcher(shared: &Arc<Shared>, root: &Path) {
    let slot = {
        let mut watchers = shared.watchers.lock().await;
        watchers.remove(root)
    };
    if let Some(slot) = slot {
        slot.cancel.cancel();
        if let Err(e) = slot.task.await {
            tracing::warn!(root = %root.display(), error = %e, "watcher task panicked");
        }
    }
}

/// Replace a running watcher with one using an updated workspace
/// description.
async fn restart_watcher(shared: &Arc<Shared>, workspace: WorkspaceSpec) {
    let root = workspace.root.clone();
    stop_watcher(shared, &root).await;
    start_watcher(shared, workspace).await;
}

/// Keep one watcher process running until cancelled or its workspace goes
/// away.
async fn monitor_watcher(
    shared: Arc<Shared>,
    workspace: WorkspaceSpec,
    slot_id: u64,
    cancel: CancellationToken,
) {
    let root = workspace.root.clone();
    loop {
        let mut process = match WatcherProcess::spawn(&workspace) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(root = %root.display(), error = %e, "failed to start watcher");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RESTART_DELAY) => continue,
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => {
                if let Err(e) = process.graceful_terminate(TERMINATE_TIMEOUT).await {
                    tracing::warn!(root = %root.display(), error = %e, "failed to terminate watcher");
                }
                break;
            }
            status = process.wait() => {
                match status {
                    Ok(status) if status.code() == Some(EXIT_WORKSPACE_GONE) => {
                        tracing::warn!(root = %root.display(), "workspace root gone, removing from configuration");
                        if let Err(e) = shared.store.lock().await.remove_workspace(&root) {
                            tracing::error!(root = %root.display(), error = %e, "failed to update configuration");
                        }
                        break;
                    }
                    Ok(status) if status.success() => {
                        tracing::info!(root = %root.display(), "watcher stopped cleanly");
                        break;
                    }
                    Ok(status) => {
                        tracing::warn!(root = %root.display(), %status, "watcher died, restarting");
                    }
                    Err(e) => {
                        tracing::warn!(root = %root.display(), error = %e, "failed to wait for watcher, restarting");
                    }
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RESTART_DELAY) => {}
                }
            }
        }
    }

    // Deregister, unless a newer monitor already took over this root or
    // stop_watcher removed the slot before cancelling.
    let mut watchers = shared.watchers.lock().await;
    if watchers.get(&root).is_some_and(|slot| slot.id == slot_id) {
        watchers.remove(&root);
    }
}

/// Serve one command against the configuration and the watcher set.
///
/// The store lock is released before any watcher is started or stopped;
/// the monitor task of a dying watcher takes the same lock and must not
/// find it held by a handler that is waiting for the monitor to finish.
async fn handle_request(shared: &Arc<Shared>, request: DaemonRequest) -> DaemonResponse {
    match request {
        DaemonRequest::AddWorkspace { workspace } => {
            if !workspace.root.is_dir() {
                return DaemonResponse::error(format!(
                    "'{}' is not an existing directory",
                    workspace.root.display()
                ));
            }
            let added = shared.store.lock().await.add_workspace(workspace.clone());
            match added {
                Ok(()) => {
                    let root = workspace.root.clone();
                    start_watcher(shared, workspace).await;
                    DaemonResponse::ok(format!("workspace '{}' added", root.display()))
                }
                Err(e) => DaemonResponse::error(e.to_string()),
            }
        }
        DaemonRequest::RemoveWorkspace { root } => {
            let removed = shared.store.lock().await.remove_workspace(&root);
            match removed {
                Ok(_removed) => {
                    stop_watcher(shared, &root).await;
                    DaemonResponse::ok(format!("workspace '{}' removed", root.display()))
                }
                Err(e) => DaemonResponse::error(e.to_string()),
            }
        }
        DaemonRequest::AddRemoteSystem { root, remote } => {
            let destination = remote.describe();
            let updated = shared.store.lock().await.add_remote(&root, remote);
            match updated {
                Ok(updated) => {
                    restart_watcher(shared, updated).await;
                    DaemonResponse::ok(format!(
                        "remote '{destination}' added to '{}'",
                        root.display()
                    ))
                }
                Err(e) => DaemonResponse::error(e.to_string()),
            }
        }
        DaemonRequest::RemoveRemoteSystem { root, remote_root } => {
            let updated = shared.store.lock().await.remove_remote(&root, &remote_root);
            match updated {
                Ok(Some(updated)) => {
                    restart_watcher(shared, updated).await;
                    DaemonResponse::ok(format!(
                        "remote '{remote_root}' removed from '{}'",
                        root.display()
                    ))
                }
                Ok(None) => {
                    stop_watcher(shared, &root).await;
                    DaemonResponse::ok(format!(
                        "remote '{remote_root}' removed; workspace '{}' had no remotes left and was dropped",
                        root.display()
                    ))
                }
                Err(e) => DaemonResponse::error(e.to_string()),
            }
        }
        DaemonRequest::Status => {
            let workspaces = shared.store.lock().await.load();
            match workspaces {
                Ok(workspaces) => {
                    let watchers = shared.watchers.lock().await;
                    let mut lines = vec![format!("{} workspace(s) configured", workspaces.len())];
                    for workspace in &workspaces {
                        let state = if watchers.contains_key(&workspace.root) {
                            "watching"
                        } else {
                            "stopped"
                        };
                        let destinations: Vec<String> =
                            workspace.remotes.iter().map(|r| r.describe()).collect();
                        lines.push(format!(
                            "{} [{}] -> {}",
                            workspace.root.display(),
                            state,
                            destinations.join(", ")
                        ));
                    }
                    DaemonResponse::ok(lines.join("\n"))
                }
                Err(e) => DaemonResponse::error(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Connection, RemoteTarget};
    use tempfile::TempDir;

    fn shared_with_config(dir: &TempDir) -> Arc<Shared> {
        Arc::new(Shared {
            store: Mutex::new(ConfigStore::new(dir.path().join("workspaces.json"))),
            watchers: Mutex::new(HashMap::new()),
            next_slot_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    fn remote() -> RemoteTarget {
        RemoteTarget {
            root: "/backup/ws".to_string(),
            connection: Connection::SshHostAlias {
                ssh_host_alias: "mirror".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn add_workspace_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let shared = shared_with_config(&dir);

        let response = handle_request(
            &shared,
            DaemonRequest::AddWorkspace {
                workspace: WorkspaceSpec {
                    root: dir.path().join("does-not-exist"),
                    remotes: vec![remote()],
                },
            },
        )
        .await;

        assert!(matches!(response, DaemonResponse::Error { .. }));
        assert!(shared.store.lock().await.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_workspace_is_an_error() {
        let dir = TempDir::new().unwrap();
        let shared = shared_with_config(&dir);

        let response = handle_request(
            &shared,
            DaemonRequest::RemoveWorkspace {
                root: PathBuf::from("/nope"),
            },
        )
        .await;

        assert!(matches!(response, DaemonResponse::Error { .. }));
    }

    #[tokio::test]
    async fn status_reports_configured_workspaces() {
        let dir = TempDir::new().unwrap();
        let shared = shared_with_config(&dir);
        shared
            .store
            .lock()
            .await
            .add_workspace(WorkspaceSpec {
                root: PathBuf::from("/ws/a"),
                remotes: vec![remote()],
            })
            .unwrap();

        let response = handle_request(&shared, DaemonRequest::Status).await;
        let DaemonResponse::Ok { message } = response else {
            panic!("expected ok status");
        };
        assert!(message.contains("/ws/a"));
        assert!(message.contains("mirror:/backup/ws"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_removals_leave_no_workspace_behind() {
        let dir = TempDir::new().unwrap();
        let shared = shared_with_config(&dir);
        for i in 0..16 {
            shared
                .store
                .lock()
                .await
                .add_workspace(WorkspaceSpec {
                    root: PathBuf::from(format!("/ws/{i}")),
                    remotes: vec![remote()],
                })
                .unwrap();
        }

        // Each request does a load-modify-save of the same file; without
        // the store lock, interleaved handlers overwrite each other's save
        // and resurrect a workspace another client was told was removed.
        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let mut requests = Vec::new();
        for i in 0..16 {
            let shared = Arc::clone(&shared);
            let barrier = Arc::clone(&barrier);
            requests.push(tokio::spawn(async move {
                barrier.wait().await;
                handle_request(
                    &shared,
                    DaemonRequest::RemoveWorkspace {
                        root: PathBuf::from(format!("/ws/{i}")),
                    },
                )
                .await
            }));
        }
        for request in requests {
            assert!(matches!(
                request.await.unwrap(),
                DaemonResponse::Ok { .. }
            ));
        }

        assert!(shared.store.lock().await.load().unwrap().is_empty());
    }
}
