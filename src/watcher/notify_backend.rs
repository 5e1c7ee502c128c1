//! Production watch backend on top of the `notify` crate.
//!
//! Each tracked directory gets its own non-recursive watch. `notify`
//! delivers events keyed by path; this module owns the path ↔ handle table
//! needed to translate them into the handle-keyed [`FsEvent`] stream the
//! engine consumes. Events whose owning directory is no longer in the table
//! refer to a watch that was already torn down and are dropped here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::backend::{FsEvent, FsEventKind, WatchBackend};
use super::index::WatchHandle;

/// Path ↔ handle table shared with the notification callback.
#[derive(Debug, Default)]
struct DirTable {
    next_handle: u32,
    by_path: HashMap<PathBuf, WatchHandle>,
    by_handle: HashMap<WatchHandle, PathBuf>,
}

impl DirTable {
    fn allocate(&mut self, dir: &Path) -> WatchHandle {
        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;
        self.by_path.insert(dir.to_path_buf(), handle);
        self.by_handle.insert(handle, dir.to_path_buf());
        handle
    }

    fn release(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.by_handle.remove(&handle)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Resolve the watch owning an event about `path`: the watch on the
    /// path's parent directory.
    fn owner_of(&self, path: &Path) -> Option<(WatchHandle, std::ffi::OsString)> {
        let parent = path.parent()?;
        let handle = self.by_path.get(parent).copied()?;
        Some((handle, path.file_name()?.to_os_string()))
    }
}

/// Watch backend backed by [`notify::RecommendedWatcher`].
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    table: Arc<Mutex<DirTable>>,
}

impl NotifyBackend {
    /// Create the backend; translated events are pushed into `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying watcher cannot be created.
    pub fn new(tx: mpsc::UnboundedSender<FsEvent>) -> Result<Self, notify::Error> {
        let table = Arc::new(Mutex::new(DirTable::default()));
        let callback_table = Arc::clone(&table);

        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let translated = {
                        let table = callback_table
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        translate(&event, &table)
                    };
                    for fs_event in translated {
                        // Receiver dropped means the engine is shutting down.
                        let _ = tx.send(fs_event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "file notification error");
                }
            },
            Config::default(),
        )?;

        Ok(Self { watcher, table })
    }
}

impl WatchBackend for NotifyBackend {
    fn add_watch(&mut self, dir: &Path) -> Result<WatchHandle, notify::Error> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        let mut table = self
            .table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(table.allocate(dir))
    }

    fn remove_watch(&mut self, handle: WatchHandle) {
        let path = {
            let mut table = self
                .table
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            table.release(handle)
        };
        if let Some(path) = path {
            // The OS drops watches on deleted directories on its own, so a
            // failed unwatch here is expected and benign.
            if let Err(e) = self.watcher.unwatch(&path) {
                tracing::trace!(path = %path.display(), error = %e, "unwatch after removal");
            }
        }
    }
}

/// Translate one `notify` event into zero or more engine events.
///
/// Deletions and renames of a watched directory are reported both by its own
/// watch and by its parent's; both carry the same path here. The parent-keyed
/// translation is emitted for both, and the dispatcher drops the duplicate as
/// stale. Only when the parent is untracked (the workspace root) does the
/// event become a self-removal.
fn translate(event: &Event, table: &DirTable) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .first()
            .and_then(|p| child_event(table, p, FsEventKind::CloseWrite, false))
            .into_iter()
            .collect(),
        EventKind::Create(kind) => event
            .paths
            .first()
            .and_then(|p| child_event(table, p, FsEventKind::Created, kind == CreateKind::Folder))
            .into_iter()
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .first()
            .and_then(|p| departure(table, p, FsEventKind::Removed, kind == RemoveKind::Folder))
            .into_iter()
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .first()
            .and_then(|p| departure(table, p, FsEventKind::MovedFrom, false))
            .into_iter()
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .first()
            .and_then(|p| child_event(table, p, FsEventKind::MovedTo, false))
            .into_iter()
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Coalesced rename: first path is the source, second the target.
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.extend(departure(table, from, FsEventKind::MovedFrom, false));
            }
            if let Some(to) = event.paths.get(1) {
                out.extend(child_event(table, to, FsEventKind::MovedTo, false));
            }
            out
        }
        _ => Vec::new(),
    }
}

fn child_event(
    table: &DirTable,
    path: &Path,
    kind: FsEventKind,
    is_dir: bool,
) -> Option<FsEvent> {
    let (handle, name) = table.owner_of(path)?;
    Some(FsEvent {
        handle,
        kind,
        name: Some(name),
        is_dir,
    })
}

/// A deletion or move-away: prefer the parent's view; fall back to a
/// self-removal when the path itself is the only watched party (the root).
fn departure(
    table: &DirTable,
    path: &Path,
    kind: FsEventKind,
    known_dir: bool,
) -> Option<FsEvent> {
    let is_dir = known_dir || table.by_path.contains_key(path);
    if let Some(event) = child_event(table, path, kind, is_dir) {
        return Some(event);
    }
    table
        .by_path
        .get(path)
        .copied()
        .map(FsEvent::self_removed)
}
