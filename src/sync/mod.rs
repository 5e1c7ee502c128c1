//! Mirroring of local directories to remote destinations.

pub mod transfer;
pub mod trigger;

pub use transfer::{RsyncTransfer, Transfer, TransferError};
pub use trigger::SyncTrigger;
