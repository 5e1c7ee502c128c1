//! IPC between the client CLI and the daemon.
//!
//! Communication uses JSON-line format over a Unix domain socket: the
//! client sends one [`DaemonRequest`] terminated by a newline and reads
//! back one [`DaemonResponse`] the same way.

pub mod client;
pub mod server;
pub mod types;

pub use client::IpcClient;
pub use server::{IpcServer, ServerHandle};
pub use types::{DaemonRequest, DaemonResponse, IpcError};

/// Default path of the daemon's command socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/wsmirror.sock";
