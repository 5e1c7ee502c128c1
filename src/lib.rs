//! Continuous one-way mirroring of local directory trees to remote hosts.
//!
//! A daemon keeps one watcher process per configured workspace. Each
//! watcher maintains a tree of per-directory filesystem watches and, on
//! every relevant change, mirrors the affected directory to all of the
//! workspace's remote destinations with rsync. A client CLI talks to the
//! daemon over a Unix domain socket to add and remove workspaces and
//! remotes at runtime.

pub mod config;
pub mod daemon;
pub mod ipc;
pub mod paths;
pub mod sync;
pub mod watcher;
