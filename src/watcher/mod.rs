//! Directory watch tree for one workspace.

pub mod backend;
pub mod engine;
pub mod error;
pub mod index;
pub mod notify_backend;

pub use backend::{FsEvent, FsEventKind, WatchBackend};
pub use engine::{Engine, EngineExit, Step};
pub use error::EngineError;
pub use index::{WatchEntry, WatchHandle, WatchIndex};
pub use notify_backend::NotifyBackend;
