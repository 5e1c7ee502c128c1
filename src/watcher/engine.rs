//! The watch-tree engine: keeps the set of directory watches exactly
//! mirroring the live directory tree and turns raw notifications into
//! subtree registrations, subtree teardowns, and sync requests.
//!
//! The engine owns one workspace root. Watches are per-directory and
//! non-recursive; recursion is the engine's job. All tree mutations go
//! through [`Engine::register_subtree`] and the private subtree remover so
//! the dual index in [`WatchIndex`] never diverges from the watch set.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::paths;
use crate::sync::SyncTrigger;

use super::backend::{FsEvent, FsEventKind, WatchBackend};
use super::error::EngineError;
use super::index::{WatchEntry, WatchIndex};

/// Outcome of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do; the event was stale, suppressed, or informational.
    Continue,
    /// Mirror the directory at this workspace-relative path to all remotes.
    Sync(PathBuf),
    /// The workspace root itself was deleted or renamed away.
    RootRemoved,
}

/// Why the engine's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// Asked to stop; all watches were torn down.
    Shutdown,
    /// The workspace root disappeared from the filesystem.
    RootRemoved,
}

/// Watch-tree engine for a single workspace.
pub struct Engine<B: WatchBackend> {
    root: PathBuf,
    backend: B,
    index: WatchIndex,
    trigger: SyncTrigger,
}

impl<B: WatchBackend> Engine<B> {
    /// Create an engine for the workspace rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf, backend: B, trigger: SyncTrigger) -> Self {
        Self {
            root,
            backend,
            index: WatchIndex::new(),
            trigger,
        }
    }

    /// The current watch index.
    #[must_use]
    pub fn index(&self) -> &WatchIndex {
        &self.index
    }

    /// Establish the initial watch tree over the whole workspace.
    ///
    /// # Errors
    ///
    /// Fails if any directory cannot be watched or listed.
    pub fn bootstrap(&mut self) -> Result<(), EngineError> {
        self.register_subtree(PathBuf::new())
    }

    /// Register watches on the directory at `rel` and every directory
    /// below it, parents strictly before children.
    ///
    /// # Errors
    ///
    /// Any failure to establish a watch or list a directory is fatal;
    /// there is no partial-tree mode.
    pub fn register_subtree(&mut self, rel: PathBuf) -> Result<(), EngineError> {
        let mut queue = VecDeque::from([rel]);
        while let Some(rel) = queue.pop_front() {
            let abs = paths::join_relative(&self.root, &rel);
            let handle = self
                .backend
                .add_watch(&abs)
                .map_err(|source| EngineError::WatchRegistration {
                    path: abs.clone(),
                    source,
                })?;
            tracing::trace!(path = %abs.display(), %handle, "watch established");
            self.index
                .insert(WatchEntry::new(handle, abs.clone(), rel.clone()))?;

            if !rel.as_os_str().is_empty() {
                let parent_path = abs.parent().ok_or_else(|| {
                    EngineError::Corrupt(format!("watched path '{}' has no parent", abs.display()))
                })?;
                let parent_handle = self
                    .index
                    .require_handle_at(parent_path, "parent directory")?;
                let parent = self.index.get_mut(parent_handle).ok_or_else(|| {
                    EngineError::Corrupt(format!("parent handle {parent_handle} unresolvable"))
                })?;
                parent.children.push(handle);
            }

            let listing = fs::read_dir(&abs).map_err(|source| EngineError::Walk {
                path: abs.clone(),
                source,
            })?;
            for dir_entry in listing {
                let dir_entry = dir_entry.map_err(|source| EngineError::Walk {
                    path: abs.clone(),
                    source,
                })?;
                let file_type = dir_entry.file_type().map_err(|source| EngineError::Walk {
                    path: abs.clone(),
                    source,
                })?;
                // Symlinks are not followed; a link to a directory is
                // mirrored as a link, not walked into.
                if file_type.is_dir() {
                    queue.push_back(rel.join(dir_entry.file_name()));
                }
            }
        }
        Ok(())
    }

    /// Tear down the watch on `handle` and on every tracked directory
    /// below it. No-op when the handle was already removed.
    ///
    /// Each node's watch is dropped and its index entry deleted before its
    /// children are visited, so events still in flight for the condemned
    /// subtree resolve as stale.
    fn remove_subtree(&mut self, handle: super::index::WatchHandle) -> Result<(), EngineError> {
        let Some(entry) = self.index.get(handle) else {
            return Ok(());
        };
        if !entry.is_root() {
            let parent_path = entry.abs_path.parent().map(Path::to_path_buf).ok_or_else(|| {
                EngineError::Corrupt(format!(
                    "non-root entry '{}' has no parent path",
                    entry.abs_path.display()
                ))
            })?;
            let parent_handle = self
                .index
                .require_handle_at(&parent_path, "parent directory")?;
            let parent = self.index.get_mut(parent_handle).ok_or_else(|| {
                EngineError::Corrupt(format!("parent handle {parent_handle} unresolvable"))
            })?;
            parent.children.retain(|h| *h != handle);
        }

        let mut queue = vec![handle];
        while let Some(current) = queue.pop() {
            self.backend.remove_watch(current);
            let Some(entry) = self.index.remove(current)? else {
                continue;
            };
            tracing::trace!(path = %entry.abs_path.display(), handle = %current, "watch removed");
            queue.extend(entry.children);
        }
        Ok(())
    }

    /// Dispatch one raw event against the current tree.
    ///
    /// # Errors
    ///
    /// Only index-corruption and watch-registration failures surface here;
    /// races with concurrent filesystem activity resolve to
    /// [`Step::Continue`].
    pub fn handle_event(&mut self, event: &FsEvent) -> Result<Step, EngineError> {
        if event.kind == FsEventKind::Ignored {
            return Ok(Step::Continue);
        }
        let Some(owner) = self.index.get(event.handle) else {
            // Refers to a watch this engine already tore down.
            tracing::trace!(handle = %event.handle, "stale event dropped");
            return Ok(Step::Continue);
        };
        let owner_abs = owner.abs_path.clone();
        let owner_rel = owner.rel_path.clone();
        let owner_is_root = owner.is_root();

        match event.kind {
            FsEventKind::SelfRemoved => {
                // Non-root directories are cleaned up via the parent's
                // delete or move event for the same child.
                if owner_is_root {
                    self.remove_subtree(event.handle)?;
                    return Ok(Step::RootRemoved);
                }
                return Ok(Step::Continue);
            }
            FsEventKind::Created | FsEventKind::MovedTo => {
                let Some(name) = &event.name else {
                    return Ok(Step::Continue);
                };
                let child_abs = owner_abs.join(name);
                match fs::symlink_metadata(&child_abs) {
                    // Gone again already, e.g. an editor swap file.
                    Err(_) => return Ok(Step::Continue),
                    Ok(meta) if meta.is_dir() => {
                        // A directory created while the registrar was
                        // walking its parent is tracked already; the late
                        // notification carries no new work.
                        if self.index.handle_at(&child_abs).is_none() {
                            self.register_subtree(owner_rel.join(name))?;
                        }
                    }
                    Ok(_) => {
                        if event.kind == FsEventKind::Created {
                            // A close-after-write for the same file follows;
                            // syncing now would transfer it twice.
                            return Ok(Step::Continue);
                        }
                    }
                }
            }
            FsEventKind::Removed | FsEventKind::MovedFrom if event.is_dir => {
                let Some(name) = &event.name else {
                    return Ok(Step::Continue);
                };
                let child_abs = owner_abs.join(name);
                let Some(child_handle) = self.index.handle_at(&child_abs) else {
                    // Never tracked, nothing to mirror away.
                    return Ok(Step::Continue);
                };
                self.remove_subtree(child_handle)?;
            }
            _ => {}
        }
        Ok(Step::Sync(owner_rel))
    }

    /// Run until cancelled or the workspace root disappears.
    ///
    /// Performs one full-workspace sync, establishes the watch tree, then
    /// serves events from `events`.
    ///
    /// # Errors
    ///
    /// Watch-registration failures and index corruption end the run; the
    /// process is expected to exit and be restarted with a fresh tree.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<FsEvent>,
        cancel: CancellationToken,
    ) -> Result<EngineExit, EngineError> {
        self.trigger.sync(Path::new("")).await;
        self.bootstrap()?;
        tracing::info!(
            root = %self.root.display(),
            watches = self.index.len(),
            "watch tree established"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.teardown()?;
                    return Ok(EngineExit::Shutdown);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        self.teardown()?;
                        return Ok(EngineExit::Shutdown);
                    };
                    match self.handle_event(&event)? {
                        Step::Continue => {}
                        Step::Sync(rel) => self.trigger.sync(&rel).await,
                        Step::RootRemoved => {
                            tracing::warn!(root = %self.root.display(), "workspace root removed");
                            return Ok(EngineExit::RootRemoved);
                        }
                    }
                }
            }
        }
    }

    fn teardown(&mut self) -> Result<(), EngineError> {
        if let Some(root_handle) = self.index.handle_at(&self.root) {
            self.remove_subtree(root_handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Connection, RemoteTarget};
    use crate::sync::{Transfer, TransferError};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::watcher::index::WatchHandle;

    /// Backend that hands out sequential handles without touching the OS.
    #[derive(Default)]
    struct FakeBackend {
        next: u32,
    }

    impl WatchBackend for FakeBackend {
        fn add_watch(&mut self, _dir: &Path) -> Result<WatchHandle, notify::Error> {
            let handle = WatchHandle(self.next);
            self.next += 1;
            Ok(handle)
        }

        fn remove_watch(&mut self, _handle: WatchHandle) {}
    }

    struct NullTransfer;

    #[async_trait]
    impl Transfer for NullTransfer {
        async fn mirror(
            &self,
            _local_dir: &Path,
            _remote: &RemoteTarget,
            _rel: &Path,
        ) -> Result<(), TransferError> {
            Ok(())
        }
    }

    fn remote() -> RemoteTarget {
        RemoteTarget {
            root: "/backup/ws".to_string(),
            connection: Connection::SshHostAlias {
                ssh_host_alias: "mirror".to_string(),
            },
        }
    }

    fn engine_for(dir: &TempDir) -> Engine<FakeBackend> {
        let trigger = SyncTrigger::new(
            dir.path().to_path_buf(),
            vec![remote()],
            Arc::new(NullTransfer),
        );
        Engine::new(dir.path().to_path_buf(), FakeBackend::default(), trigger)
    }

    fn handle_of(engine: &Engine<FakeBackend>, abs: &Path) -> WatchHandle {
        engine.index().handle_at(abs).unwrap()
    }

    #[test]
    fn bootstrap_tracks_every_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();
        fs::write(dir.path().join("a/file.txt"), b"x").unwrap();

        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        assert_eq!(engine.index().len(), 4);
        engine.index().check_consistency().unwrap();
        let root = engine.index().entry_at(dir.path()).unwrap();
        assert_eq!(root.children.len(), 2);

        let mut rels: Vec<_> = engine.index().rel_paths();
        rels.sort_unstable();
        let expected: Vec<PathBuf> = ["", "a", "a/b", "c"].iter().map(PathBuf::from).collect();
        assert_eq!(rels, expected.iter().map(PathBuf::as_path).collect::<Vec<_>>());
    }

    #[test]
    fn invalidation_notices_carry_no_work() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let root = handle_of(&engine, dir.path());
        let event = FsEvent {
            handle: root,
            kind: FsEventKind::Ignored,
            name: None,
            is_dir: false,
        };
        assert_eq!(engine.handle_event(&event).unwrap(), Step::Continue);
    }

    #[test]
    fn created_directory_joins_the_tree_and_syncs_owner() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        fs::create_dir(dir.path().join("a/b")).unwrap();
        let a = handle_of(&engine, &dir.path().join("a"));
        let step = engine
            .handle_event(&FsEvent::child(a, FsEventKind::Created, "b", true))
            .unwrap();

        assert_eq!(step, Step::Sync(PathBuf::from("a")));
        assert_eq!(engine.index().len(), 3);
        engine.index().check_consistency().unwrap();
        let a_entry = engine.index().entry_at(&dir.path().join("a")).unwrap();
        assert_eq!(a_entry.children.len(), 1);
    }

    #[test]
    fn already_tracked_directory_is_not_reregistered() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();
        assert_eq!(engine.index().len(), 2);

        // The registrar's walk can pick a directory up before its create
        // notification is dispatched; the duplicate must not be fatal.
        let root = handle_of(&engine, dir.path());
        let step = engine
            .handle_event(&FsEvent::child(root, FsEventKind::Created, "a", true))
            .unwrap();

        assert_eq!(step, Step::Sync(PathBuf::new()));
        assert_eq!(engine.index().len(), 2);
        engine.index().check_consistency().unwrap();
    }

    #[test]
    fn deleting_a_subtree_removes_all_its_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();
        assert_eq!(engine.index().len(), 3);

        let root = handle_of(&engine, dir.path());
        fs::remove_dir_all(dir.path().join("a")).unwrap();
        let step = engine
            .handle_event(&FsEvent::child(root, FsEventKind::Removed, "a", true))
            .unwrap();

        assert_eq!(step, Step::Sync(PathBuf::new()));
        assert_eq!(engine.index().len(), 1);
        engine.index().check_consistency().unwrap();
        assert!(engine.index().entry_at(&dir.path().join("a")).is_none());
        assert!(engine.index().entry_at(&dir.path().join("a/b")).is_none());
    }

    #[test]
    fn file_create_is_suppressed_but_close_write_syncs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        fs::write(dir.path().join("a/f.txt"), b"x").unwrap();
        let a = handle_of(&engine, &dir.path().join("a"));

        let created = engine
            .handle_event(&FsEvent::child(a, FsEventKind::Created, "f.txt", false))
            .unwrap();
        assert_eq!(created, Step::Continue);

        let closed = engine
            .handle_event(&FsEvent::child(a, FsEventKind::CloseWrite, "f.txt", false))
            .unwrap();
        assert_eq!(closed, Step::Sync(PathBuf::from("a")));
    }

    #[test]
    fn file_moved_in_syncs_immediately() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        fs::write(dir.path().join("f.txt"), b"x").unwrap();
        let root = handle_of(&engine, dir.path());
        let step = engine
            .handle_event(&FsEvent::child(root, FsEventKind::MovedTo, "f.txt", false))
            .unwrap();
        assert_eq!(step, Step::Sync(PathBuf::new()));
    }

    #[test]
    fn vanished_child_is_a_benign_race() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let root = handle_of(&engine, dir.path());
        let step = engine
            .handle_event(&FsEvent::child(root, FsEventKind::Created, ".f.swp", false))
            .unwrap();
        assert_eq!(step, Step::Continue);
    }

    #[test]
    fn stale_handle_is_dropped() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let step = engine
            .handle_event(&FsEvent::child(
                WatchHandle(999),
                FsEventKind::CloseWrite,
                "f.txt",
                false,
            ))
            .unwrap();
        assert_eq!(step, Step::Continue);
    }

    #[test]
    fn duplicate_removal_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let root = handle_of(&engine, dir.path());
        fs::remove_dir(dir.path().join("a")).unwrap();
        let event = FsEvent::child(root, FsEventKind::Removed, "a", true);
        assert_eq!(engine.handle_event(&event).unwrap(), Step::Sync(PathBuf::new()));
        // Second delivery finds nothing tracked at the path and drops.
        assert_eq!(engine.handle_event(&event).unwrap(), Step::Continue);
        assert_eq!(engine.index().len(), 1);
    }

    #[test]
    fn untracked_directory_removal_is_dropped() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let root = handle_of(&engine, dir.path());
        let step = engine
            .handle_event(&FsEvent::child(root, FsEventKind::Removed, "ghost", true))
            .unwrap();
        assert_eq!(step, Step::Continue);
    }

    #[test]
    fn root_self_removal_ends_the_engine() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let root = handle_of(&engine, dir.path());
        let step = engine.handle_event(&FsEvent::self_removed(root)).unwrap();
        assert_eq!(step, Step::RootRemoved);
        assert!(engine.index().is_empty());
    }

    #[test]
    fn non_root_self_removal_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut engine = engine_for(&dir);
        engine.bootstrap().unwrap();

        let a = handle_of(&engine, &dir.path().join("a"));
        let step = engine.handle_event(&FsEvent::self_removed(a)).unwrap();
        assert_eq!(step, Step::Continue);
        assert_eq!(engine.index().len(), 2);
    }
}
