//! Workspace configuration: data model and on-disk store.

pub mod store;
pub mod types;

pub use store::{ConfigError, ConfigStore};
pub use types::{Connection, RemoteTarget, WorkspaceSpec};
