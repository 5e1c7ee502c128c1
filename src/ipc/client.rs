//! Command-socket client side.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::{DaemonRequest, DaemonResponse, IpcError, DEFAULT_SOCKET_PATH};

/// Default timeout for one request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Client end of the daemon's command socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    /// Creates a client for the default socket path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a client for a custom socket path.
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the exchange timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Checks whether a daemon appears to be listening.
    #[must_use]
    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }

    /// Sends one command and waits for the daemon's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is not running, the connection
    /// fails, the exchange times out, or either message cannot be
    /// (de)serialized.
    pub async fn send(&self, request: &DaemonRequest) -> Result<DaemonResponse, IpcError> {
        if !self.is_daemon_running() {
            return Err(IpcError::DaemonNotRunning);
        }

        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;

        let result = tokio::time::timeout(self.timeout, async {
            let stream = UnixStream::connect(&self.socket_path).await?;
            let (reader, mut writer) = stream.into_split();

            let mut request_json = serde_json::to_string(request)?;
            request_json.push('\n');
            writer.write_all(request_json.as_bytes()).await?;
            writer.flush().await?;

            let mut reader = BufReader::new(reader);
            let mut response_line = String::new();
            let bytes_read = reader.read_line(&mut response_line).await?;

            if bytes_read == 0 {
                return Err(IpcError::InvalidResponse);
            }

            let response: DaemonResponse = serde_json::from_str(response_line.trim())?;
            Ok(response)
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(IpcError::Timeout(timeout_ms)),
        }
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_new_uses_default_path() {
        let client = IpcClient::new();
        assert_eq!(client.socket_path(), Path::new(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn client_with_path_uses_custom_path() {
        let client = IpcClient::with_path("/custom/path.sock");
        assert_eq!(client.socket_path(), Path::new("/custom/path.sock"));
    }

    #[test]
    fn client_reports_missing_daemon() {
        let client = IpcClient::with_path("/nonexistent/socket.sock");
        assert!(!client.is_daemon_running());
    }

    #[tokio::test]
    async fn send_fails_fast_without_daemon() {
        let client = IpcClient::with_path("/nonexistent/socket.sock");
        let result = client.send(&DaemonRequest::Status).await;
        assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
    }
}
