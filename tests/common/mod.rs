//! Shared test doubles for the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wsmirror::config::RemoteTarget;
use wsmirror::sync::{Transfer, TransferError};
use wsmirror::watcher::{WatchBackend, WatchHandle};

/// Watch backend that hands out sequential handles without touching the
/// OS notification facility.
#[derive(Default)]
pub struct FakeBackend {
    next: u32,
    removed: Arc<Mutex<Vec<WatchHandle>>>,
}

impl FakeBackend {
    pub fn new() -> (Self, Arc<Mutex<Vec<WatchHandle>>>) {
        let removed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                next: 0,
                removed: Arc::clone(&removed),
            },
            removed,
        )
    }
}

impl WatchBackend for FakeBackend {
    fn add_watch(&mut self, _dir: &Path) -> Result<WatchHandle, notify::Error> {
        let handle = WatchHandle(self.next);
        self.next += 1;
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) {
        self.removed.lock().unwrap().push(handle);
    }
}

/// One observed transfer: local directory, destination description,
/// workspace-relative path.
pub type MirrorCall = (PathBuf, String, PathBuf);

/// Transfer that records every invocation instead of running rsync.
pub struct RecordingTransfer {
    calls: Arc<Mutex<Vec<MirrorCall>>>,
    fail_for: Option<String>,
}

impl RecordingTransfer {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<MirrorCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
                fail_for: None,
            }),
            calls,
        )
    }

    /// Recording transfer that fails for the destination with the given
    /// description.
    pub fn failing_for(destination: &str) -> (Arc<Self>, Arc<Mutex<Vec<MirrorCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
                fail_for: Some(destination.to_string()),
            }),
            calls,
        )
    }
}

#[async_trait]
impl Transfer for RecordingTransfer {
    async fn mirror(
        &self,
        local_dir: &Path,
        remote: &RemoteTarget,
        rel: &Path,
    ) -> Result<(), TransferError> {
        let destination = remote.describe();
        self.calls.lock().unwrap().push((
            local_dir.to_path_buf(),
            destination.clone(),
            rel.to_path_buf(),
        ));
        if self.fail_for.as_deref() == Some(destination.as_str()) {
            return Err(TransferError::Spawn(std::io::Error::other("unreachable")));
        }
        Ok(())
    }
}
