//! Path arithmetic shared by the watch engine and the transfer layer.
//!
//! Workspace-relative paths use the empty path for the root itself, so the
//! helpers here must not sprout stray separators when joining it. Arguments
//! destined for rsync are built as `OsString`s; directory names are not
//! required to be UTF-8.

use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Join a workspace-relative path onto an absolute root.
///
/// The empty relative path yields the root unchanged.
#[must_use]
pub fn join_relative(root: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// Format a local directory as an rsync source argument.
///
/// The trailing slash makes rsync mirror the directory's contents rather
/// than the directory itself.
#[must_use]
pub fn rsync_source(dir: &Path) -> OsString {
    let mut source = dir.as_os_str().to_os_string();
    if dir.as_os_str().as_bytes().last() != Some(&b'/') {
        source.push("/");
    }
    source
}

/// Join a workspace-relative path onto a remote root path string.
#[must_use]
pub fn join_remote(remote_root: &str, rel: &Path) -> OsString {
    let mut joined = OsString::from(remote_root.trim_end_matches('/'));
    if !rel.as_os_str().is_empty() {
        joined.push("/");
        joined.push(rel);
    }
    joined
}
