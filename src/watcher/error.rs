//! Watch engine error types.
//!
//! The engine distinguishes benign races (stale handles, vanished stat
//! targets), which are silently dropped and never surface here, from fatal
//! conditions that end the watcher process: failure to establish a watch and
//! index corruption. There is no partial-tree mode; the supervisor restarts
//! the process and the tree is rebuilt from scratch.

use std::path::PathBuf;

/// Fatal errors of the watch-tree engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The OS refused to establish a directory watch (permissions, watch
    /// limit). Fatal: the tree would be incomplete.
    #[error("failed to establish watch on '{path}': {source}")]
    WatchRegistration {
        /// Directory the watch was requested for.
        path: PathBuf,
        /// Underlying watcher error.
        #[source]
        source: notify::Error,
    },

    /// Listing a directory during subtree registration failed.
    #[error("failed to list directory '{path}': {source}")]
    Walk {
        /// Directory that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The dual index and the directory tree diverged beyond safe repair.
    #[error("watch index corrupted: {0}")]
    Corrupt(String),
}
