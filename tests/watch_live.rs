//! Live filesystem test: the real notification backend feeding the
//! engine.
//!
//! Event delivery latency varies by platform, so these tests poll with
//! generous timeouts and assert only on outcomes that every backend
//! reports.

mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{MirrorCall, RecordingTransfer};
use wsmirror::config::{Connection, RemoteTarget};
use wsmirror::sync::{SyncTrigger, Transfer};
use wsmirror::watcher::{Engine, EngineExit, NotifyBackend};

fn alias_remote() -> RemoteTarget {
    RemoteTarget {
        root: "/backup/ws".to_string(),
        connection: Connection::SshHostAlias {
            ssh_host_alias: "mirror".to_string(),
        },
    }
}

async fn wait_for_call_with_rel(
    calls: &Arc<Mutex<Vec<MirrorCall>>>,
    rel: &PathBuf,
) -> bool {
    for _ in 0..300 {
        if calls.lock().unwrap().iter().any(|c| c.2 == *rel) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn created_directory_is_picked_up_and_mirrored() {
    let dir = TempDir::new().unwrap();
    let (transfer, calls) = RecordingTransfer::new();
    let trigger = SyncTrigger::new(
        dir.path().to_path_buf(),
        vec![alias_remote()],
        transfer as Arc<dyn Transfer>,
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let backend = NotifyBackend::new(tx).expect("failed to create backend");
    let mut engine = Engine::new(dir.path().to_path_buf(), backend, trigger);

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { engine.run(rx, run_cancel).await });

    // The initial full sync uses the empty relative path.
    assert!(wait_for_call_with_rel(&calls, &PathBuf::new()).await);

    let before = calls.lock().unwrap().len();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    // The root watch reports the new directory and its parent (the root)
    // is mirrored again.
    for _ in 0..300 {
        if calls.lock().unwrap().len() > before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(calls.lock().unwrap().len() > before, "no sync after mkdir");

    // Changes inside the new directory are attributed to it, proving its
    // own watch is live.
    std::fs::write(dir.path().join("sub/file.txt"), b"payload").unwrap();
    assert!(
        wait_for_call_with_rel(&calls, &PathBuf::from("sub")).await,
        "no sync attributed to the new directory"
    );

    cancel.cancel();
    let exit = task.await.unwrap().unwrap();
    assert_eq!(exit, EngineExit::Shutdown);
}

#[tokio::test]
async fn deleting_the_root_ends_the_watcher() {
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("workspace");
    std::fs::create_dir(&root).unwrap();

    let (transfer, calls) = RecordingTransfer::new();
    let trigger = SyncTrigger::new(root.clone(), vec![alias_remote()], transfer as Arc<dyn Transfer>);

    let (tx, rx) = mpsc::unbounded_channel();
    let backend = NotifyBackend::new(tx).expect("failed to create backend");
    let mut engine = Engine::new(root.clone(), backend, trigger);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(async move { engine.run(rx, cancel).await });

    assert!(wait_for_call_with_rel(&calls, &PathBuf::new()).await);
    std::fs::remove_dir(&root).unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("watcher did not stop after root removal")
        .unwrap()
        .unwrap();
    assert_eq!(exit, EngineExit::RootRemoved);
}
