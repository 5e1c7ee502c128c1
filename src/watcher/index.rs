//! Dual-keyed registry of active directory watches.
//!
//! Every watched directory has exactly one [`WatchEntry`], reachable both by
//! its watch handle and by its absolute path. The two views must always
//! cover the same set of entries; any divergence means the engine's picture
//! of the directory tree can no longer be trusted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::EngineError;

/// Identifier of one active directory watch.
///
/// Unique among currently-active watches; values may be reused after a
/// watch is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub u32);

impl std::fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record of one actively-watched directory.
#[derive(Debug, Clone)]
pub struct WatchEntry {
    /// Handle of the watch on this directory.
    pub handle: WatchHandle,
    /// Absolute path of the directory.
    pub abs_path: PathBuf,
    /// Path relative to the workspace root; empty for the root itself.
    pub rel_path: PathBuf,
    /// Watch handles of the directly contained subdirectories, in
    /// registration order.
    pub children: Vec<WatchHandle>,
}

impl WatchEntry {
    /// Create an entry with no children yet.
    #[must_use]
    pub fn new(handle: WatchHandle, abs_path: PathBuf, rel_path: PathBuf) -> Self {
        Self {
            handle,
            abs_path,
            rel_path,
            children: Vec::new(),
        }
    }

    /// Whether this entry is the workspace root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rel_path.as_os_str().is_empty()
    }
}

/// The two mappings over the same set of watch entries.
///
/// Invariant: `by_handle` and `by_path` always describe exactly the same
/// entries; every mutation updates both.
#[derive(Debug, Default)]
pub struct WatchIndex {
    by_handle: HashMap<WatchHandle, WatchEntry>,
    by_path: HashMap<PathBuf, WatchHandle>,
}

impl WatchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether no directory is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Look up an entry by watch handle.
    ///
    /// A miss is not an error: events routinely arrive for watches the
    /// engine already tore down.
    #[must_use]
    pub fn get(&self, handle: WatchHandle) -> Option<&WatchEntry> {
        self.by_handle.get(&handle)
    }

    pub(super) fn get_mut(&mut self, handle: WatchHandle) -> Option<&mut WatchEntry> {
        self.by_handle.get_mut(&handle)
    }

    /// Look up the watch handle registered for an absolute path.
    #[must_use]
    pub fn handle_at(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    /// Look up an entry by absolute path.
    #[must_use]
    pub fn entry_at(&self, path: &Path) -> Option<&WatchEntry> {
        self.handle_at(path).and_then(|h| self.by_handle.get(&h))
    }

    /// Path-keyed lookup that must succeed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corrupt`] when no entry exists; callers use
    /// this where the tree construction guarantees presence.
    pub(super) fn require_handle_at(
        &self,
        path: &Path,
        role: &str,
    ) -> Result<WatchHandle, EngineError> {
        self.handle_at(path).ok_or_else(|| {
            EngineError::Corrupt(format!("no entry stored for {role} '{}'", path.display()))
        })
    }

    /// Add an entry to both mappings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corrupt`] if either key is already present;
    /// the registrar never inserts a handle or path twice.
    pub(super) fn insert(&mut self, entry: WatchEntry) -> Result<(), EngineError> {
        if self.by_handle.contains_key(&entry.handle) {
            return Err(EngineError::Corrupt(format!(
                "handle {} already registered",
                entry.handle
            )));
        }
        if self.by_path.contains_key(&entry.abs_path) {
            return Err(EngineError::Corrupt(format!(
                "path '{}' already registered",
                entry.abs_path.display()
            )));
        }
        self.by_path.insert(entry.abs_path.clone(), entry.handle);
        self.by_handle.insert(entry.handle, entry);
        Ok(())
    }

    /// Remove an entry from both mappings, returning it.
    ///
    /// Removing an absent handle yields `Ok(None)`; this is what makes
    /// subtree removal idempotent under duplicate events.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corrupt`] if the entry exists under the handle
    /// but its path key is missing.
    pub(super) fn remove(
        &mut self,
        handle: WatchHandle,
    ) -> Result<Option<WatchEntry>, EngineError> {
        let Some(entry) = self.by_handle.remove(&handle) else {
            return Ok(None);
        };
        if self.by_path.remove(&entry.abs_path).is_none() {
            return Err(EngineError::Corrupt(format!(
                "entry for '{}' missing from path mapping",
                entry.abs_path.display()
            )));
        }
        Ok(Some(entry))
    }

    /// All tracked workspace-relative paths, unordered.
    #[must_use]
    pub fn rel_paths(&self) -> Vec<&Path> {
        self.by_handle.values().map(|e| e.rel_path.as_path()).collect()
    }

    /// Verify the bijection and tree invariants.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corrupt`] describing the first violation found.
    pub fn check_consistency(&self) -> Result<(), EngineError> {
        if self.by_handle.len() != self.by_path.len() {
            return Err(EngineError::Corrupt(format!(
                "mapping sizes diverged: {} handles, {} paths",
                self.by_handle.len(),
                self.by_path.len()
            )));
        }
        for (path, handle) in &self.by_path {
            let Some(entry) = self.by_handle.get(handle) else {
                return Err(EngineError::Corrupt(format!(
                    "path '{}' maps to unknown handle {handle}",
                    path.display()
                )));
            };
            if entry.abs_path != *path {
                return Err(EngineError::Corrupt(format!(
                    "path key '{}' disagrees with entry path '{}'",
                    path.display(),
                    entry.abs_path.display()
                )));
            }
        }
        for entry in self.by_handle.values() {
            if entry.is_root() {
                continue;
            }
            let parent = entry.abs_path.parent().ok_or_else(|| {
                EngineError::Corrupt(format!(
                    "non-root entry '{}' has no parent path",
                    entry.abs_path.display()
                ))
            })?;
            let parent_entry = self.entry_at(parent).ok_or_else(|| {
                EngineError::Corrupt(format!("parent of '{}' untracked", entry.abs_path.display()))
            })?;
            let links = parent_entry
                .children
                .iter()
                .filter(|h| **h == entry.handle)
                .count();
            if links != 1 {
                return Err(EngineError::Corrupt(format!(
                    "'{}' linked {links} times from its parent",
                    entry.abs_path.display()
                )));
            }
        }
        Ok(())
    }
}
