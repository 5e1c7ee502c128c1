//! Watch backend capability and the raw event model.
//!
//! The engine never talks to the OS notification facility directly; it goes
//! through [`WatchBackend`] so tests can substitute a fake that hands out
//! handles without touching the filesystem. The production implementation
//! lives in [`super::notify_backend`].

use std::ffi::OsString;
use std::path::Path;

use super::index::WatchHandle;

/// Directory watch registration facility.
pub trait WatchBackend {
    /// Establish a watch on a single directory (non-recursive).
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the engine; there is no partial-tree
    /// mode.
    fn add_watch(&mut self, dir: &Path) -> Result<WatchHandle, notify::Error>;

    /// Drop a watch. Idempotent: removing a handle the OS already
    /// invalidated is not an error.
    fn remove_watch(&mut self, handle: WatchHandle);
}

/// What happened inside (or to) a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// A file in the directory was closed after being written.
    CloseWrite,
    /// An entry was created in the directory.
    Created,
    /// An entry was deleted from the directory.
    Removed,
    /// An entry was moved out of the directory.
    MovedFrom,
    /// An entry was moved into the directory.
    MovedTo,
    /// The watched directory itself was deleted or renamed away.
    SelfRemoved,
    /// The OS invalidated the watch; carries no information the engine
    /// does not already have.
    Ignored,
}

/// One raw notification, keyed by the watch it fired on.
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// Watch the event was delivered for (the directory that owns it).
    pub handle: WatchHandle,
    /// Classification of the change.
    pub kind: FsEventKind,
    /// Name of the affected child within the watched directory; absent for
    /// self-events.
    pub name: Option<OsString>,
    /// Whether the affected child is known to be a directory. Only
    /// meaningful for [`FsEventKind::Removed`] and [`FsEventKind::MovedFrom`];
    /// for appearances the engine stats the child itself.
    pub is_dir: bool,
}

impl FsEvent {
    /// Convenience constructor for a child-scoped event.
    #[must_use]
    pub fn child(
        handle: WatchHandle,
        kind: FsEventKind,
        name: impl Into<OsString>,
        is_dir: bool,
    ) -> Self {
        Self {
            handle,
            kind,
            name: Some(name.into()),
            is_dir,
        }
    }

    /// Convenience constructor for a self-removal event.
    #[must_use]
    pub fn self_removed(handle: WatchHandle) -> Self {
        Self {
            handle,
            kind: FsEventKind::SelfRemoved,
            name: None,
            is_dir: true,
        }
    }
}
