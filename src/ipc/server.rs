//! Command-socket server side.
//!
//! The daemon listens on a Unix domain socket and spawns a handler task per
//! connection. Reads are bounded by a timeout so a stalled client cannot
//! pin a connection task forever.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;

use super::{DaemonRequest, DaemonResponse, IpcError, DEFAULT_SOCKET_PATH};

/// How long one connection may take to deliver its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Command-socket server.
#[derive(Debug)]
pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a server bound to a custom socket path.
    #[must_use]
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Creates a server on the default socket path.
    #[must_use]
    pub fn with_default_path() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and starts serving requests through `handler`.
    ///
    /// A stale socket file from a previous run is removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn start<F, Fut>(&self, handler: F) -> Result<ServerHandle, IpcError>
    where
        F: Fn(DaemonRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DaemonResponse> + Send,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        let socket_path = self.socket_path.clone();

        tracing::info!(path = %socket_path.display(), "command socket listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("command socket shutting down");
                            break;
                        }
                    }

                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _addr)) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, handler).await {
                                        tracing::warn!(error = %e, "connection handler error");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to accept connection");
                            }
                        }
                    }
                }
            }
        });

        Ok(ServerHandle {
            socket_path: self.socket_path.clone(),
            shutdown_tx,
        })
    }
}

/// Handle for a running command-socket server.
///
/// When dropped, the socket file is cleaned up.
#[derive(Debug)]
pub struct ServerHandle {
    socket_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Signals the server to stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!(
                    path = %self.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            }
        }
    }
}

/// Serves one client connection: read a request line, run the handler,
/// write the response line.
async fn handle_connection<F, Fut>(
    stream: tokio::net::UnixStream,
    handler: Arc<F>,
) -> Result<(), IpcError>
where
    F: Fn(DaemonRequest) -> Fut + Send + Sync,
    Fut: Future<Output = DaemonResponse> + Send,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = READ_TIMEOUT.as_millis() as u64;
    let bytes_read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| IpcError::Timeout(timeout_ms))??;
    if bytes_read == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<DaemonRequest>(line.trim()) {
        Ok(request) => {
            tracing::debug!(?request, "received command");
            handler(request).await
        }
        Err(e) => DaemonResponse::error(format!("malformed request: {e}")),
    };

    let mut response_json = serde_json::to_string(&response)?;
    response_json.push('\n');
    writer.write_all(response_json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
