//! Read-modify-write access to the workspace configuration file.
//!
//! The daemon is the only writer. Every mutation loads the current file,
//! applies one change, and writes the whole file back, so the on-disk state
//! is always a complete, parseable snapshot.

use std::path::{Path, PathBuf};

use super::types::{RemoteTarget, WorkspaceSpec};

/// Errors of configuration load, save, and mutation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write configuration '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON of the expected shape.
    #[error("failed to parse configuration '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A workspace with this root is already configured.
    #[error("workspace '{0}' is already configured")]
    WorkspaceExists(PathBuf),

    /// No workspace with this root is configured.
    #[error("workspace '{0}' is not configured")]
    WorkspaceNotFound(PathBuf),

    /// The workspace already mirrors to this destination.
    #[error("workspace '{workspace}' already has remote '{remote}'")]
    RemoteExists { workspace: PathBuf, remote: String },

    /// The workspace has no such destination.
    #[error("workspace '{workspace}' has no remote '{remote}'")]
    RemoteNotFound { workspace: PathBuf, remote: String },
}

/// Handle on the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store over the given file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The conventional configuration path under the user's config
    /// directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wsmirror").join("workspaces.json"))
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all configured workspaces. A missing file is an empty
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<WorkspaceSpec>, ConfigError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the full workspace list back, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, workspaces: &[WorkspaceSpec]) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let content =
            serde_json::to_string_pretty(workspaces).map_err(ConfigError::Serialize)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Add a new workspace.
    ///
    /// # Errors
    ///
    /// Fails if a workspace with the same root already exists.
    pub fn add_workspace(&self, workspace: WorkspaceSpec) -> Result<(), ConfigError> {
        let mut workspaces = self.load()?;
        if workspaces.iter().any(|w| w.root == workspace.root) {
            return Err(ConfigError::WorkspaceExists(workspace.root));
        }
        workspaces.push(workspace);
        self.save(&workspaces)
    }

    /// Remove a workspace, returning its former entry.
    ///
    /// # Errors
    ///
    /// Fails if no workspace with this root exists.
    pub fn remove_workspace(&self, root: &Path) -> Result<WorkspaceSpec, ConfigError> {
        let mut workspaces = self.load()?;
        let Some(pos) = workspaces.iter().position(|w| w.root == root) else {
            return Err(ConfigError::WorkspaceNotFound(root.to_path_buf()));
        };
        let removed = workspaces.remove(pos);
        self.save(&workspaces)?;
        Ok(removed)
    }

    /// Add a destination to an existing workspace, returning the updated
    /// entry.
    ///
    /// # Errors
    ///
    /// Fails if the workspace is unknown or the destination is already
    /// present.
    pub fn add_remote(
        &self,
        root: &Path,
        remote: RemoteTarget,
    ) -> Result<WorkspaceSpec, ConfigError> {
        let mut workspaces = self.load()?;
        let Some(workspace) = workspaces.iter_mut().find(|w| w.root == root) else {
            return Err(ConfigError::WorkspaceNotFound(root.to_path_buf()));
        };
        if workspace.remotes.contains(&remote) {
            return Err(ConfigError::RemoteExists {
                workspace: root.to_path_buf(),
                remote: remote.describe(),
            });
        }
        workspace.remotes.push(remote);
        let updated = workspace.clone();
        self.save(&workspaces)?;
        Ok(updated)
    }

    /// Remove the destination whose remote root path matches `remote_root`.
    ///
    /// Returns the updated workspace, or `None` when the removed remote was
    /// the workspace's last one and the workspace entry was dropped with it.
    ///
    /// # Errors
    ///
    /// Fails if the workspace or the destination is unknown.
    pub fn remove_remote(
        &self,
        root: &Path,
        remote_root: &str,
    ) -> Result<Option<WorkspaceSpec>, ConfigError> {
        let mut workspaces = self.load()?;
        let Some(pos) = workspaces.iter().position(|w| w.root == root) else {
            return Err(ConfigError::WorkspaceNotFound(root.to_path_buf()));
        };
        let workspace = &mut workspaces[pos];
        let Some(remote_pos) = workspace
            .remotes
            .iter()
            .position(|r| r.root == remote_root)
        else {
            return Err(ConfigError::RemoteNotFound {
                workspace: root.to_path_buf(),
                remote: remote_root.to_string(),
            });
        };
        workspace.remotes.remove(remote_pos);

        let updated = if workspace.remotes.is_empty() {
            // A workspace with nowhere to mirror to has no reason to be
            // watched.
            workspaces.remove(pos);
            None
        } else {
            Some(workspace.clone())
        };
        self.save(&workspaces)?;
        Ok(updated)
    }
}
