//! Artifact transfer: fetching remote resources and placing them on disk
//!
//! The core abstraction is the [`ArtifactTransfer`] trait, which the download
//! stage drives. [`HttpTransfer`] is the reqwest-backed implementation.
//!
//! Free functions in this module cover the filesystem steps that do not
//! depend on the transfer backend (temp naming, release directory creation).

mod http;

pub use http::HttpTransfer;

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Permissions for newly created release directories
#[cfg(unix)]
const RELEASE_DIR_MODE: u32 = 0o744;

/// Fetch, inspect and move artifacts
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    /// Fetch `url` into `destination`, bounded by `timeout`
    ///
    /// On failure no partial file is left at `destination`.
    async fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<()>;

    /// Whether a regular file exists at `path`
    async fn exists(&self, path: &Path) -> bool;

    /// Lowercase hex MD5 of the file at `path`
    async fn content_hash(&self, path: &Path) -> Result<String>;

    /// Atomically move `from` to `to`, replacing any existing file
    ///
    /// The parent of `to` must exist.
    async fn move_to(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a transient file, ignoring errors
    async fn discard(&self, path: &Path);
}

/// Unique in-flight path for `file_name` inside `temp_dir`
///
/// Concurrent workers handling the same version each get their own file.
pub fn temp_artifact_path(temp_dir: &Path, file_name: &str) -> PathBuf {
    temp_dir.join(format!("{}.{:016x}.part", file_name, rand::random::<u64>()))
}

/// Create `dir` and its parents if missing
pub async fn ensure_directory(dir: &Path) -> Result<()> {
    if tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(RELEASE_DIR_MODE);
    builder.create(dir).await?;

    tracing::debug!(?dir, "created release directory");
    Ok(())
}

/// Compare two hex digests case-insensitively
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
