//! Daemon process: configuration ownership and watcher supervision.

pub mod spawn;
pub mod supervisor;

pub use spawn::{SpawnError, WatcherProcess, EXIT_WORKSPACE_GONE};
pub use supervisor::{wait_for_shutdown_signal, Daemon, DaemonError};
