//! Client/server round trips over the command socket.

use std::path::PathBuf;
use std::time::Duration;

use wsmirror::config::{Connection, RemoteTarget, WorkspaceSpec};
use wsmirror::ipc::{DaemonRequest, DaemonResponse, IpcClient, IpcError, IpcServer};

fn socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wsmirror-test-{tag}-{}.sock", std::process::id()))
}

#[tokio::test]
async fn request_and_response_round_trip() {
    let socket = socket_path("roundtrip");
    let server = IpcServer::new(&socket);
    let handle = server
        .start(|request| async move {
            match request {
                DaemonRequest::Status => DaemonResponse::ok("1 workspace(s) configured"),
                DaemonRequest::RemoveWorkspace { root } => {
                    DaemonResponse::error(format!("workspace '{}' is not configured", root.display()))
                }
                _ => DaemonResponse::ok("done"),
            }
        })
        .expect("failed to start server");

    tokio::time::sleep(Duration::from_millis(10)).await;

    let client = IpcClient::with_path(&socket);
    assert!(client.is_daemon_running());

    let response = client.send(&DaemonRequest::Status).await.unwrap();
    assert_eq!(response, DaemonResponse::ok("1 workspace(s) configured"));

    let response = client
        .send(&DaemonRequest::RemoveWorkspace {
            root: PathBuf::from("/nope"),
        })
        .await
        .unwrap();
    assert!(matches!(response, DaemonResponse::Error { .. }));

    handle.shutdown();
}

#[tokio::test]
async fn nested_workspace_payload_survives_the_wire() {
    let socket = socket_path("payload");
    let server = IpcServer::new(&socket);
    let handle = server
        .start(|request| async move {
            match request {
                DaemonRequest::AddWorkspace { workspace } => DaemonResponse::ok(format!(
                    "{} remote(s) for '{}'",
                    workspace.remotes.len(),
                    workspace.root.display()
                )),
                _ => DaemonResponse::error("unexpected command"),
            }
        })
        .expect("failed to start server");

    tokio::time::sleep(Duration::from_millis(10)).await;

    let client = IpcClient::with_path(&socket);
    let response = client
        .send(&DaemonRequest::AddWorkspace {
            workspace: WorkspaceSpec {
                root: PathBuf::from("/ws/a"),
                remotes: vec![RemoteTarget {
                    root: "/backup/a".to_string(),
                    connection: Connection::Ssh {
                        username: Some("deploy".to_string()),
                        hostname: "mirror.example.com".to_string(),
                        identity_file_path: None,
                    },
                }],
            },
        })
        .await
        .unwrap();

    assert_eq!(response, DaemonResponse::ok("1 remote(s) for '/ws/a'"));

    handle.shutdown();
}

#[tokio::test]
async fn missing_daemon_is_reported_without_connecting() {
    let client = IpcClient::with_path("/nonexistent/wsmirror.sock");
    let result = client.send(&DaemonRequest::Status).await;
    assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
}
