//! Database layer for release-dl
//!
//! Handles SQLite persistence for the records pipeline stages read and update.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`versions`] — Version records (lookup, downloaded flag)
//! - [`projects`] — Project records (naming policy input)

use crate::types::{ProjectId, VersionId};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod projects;
mod versions;

/// New version record to be inserted into the database
///
/// Version records are normally created by an upstream stage; this is the
/// insertion path for that stage and for fixtures.
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Project this release belongs to
    pub project_id: ProjectId,
    /// Version label (e.g. "1.2.3")
    pub version: String,
    /// URL of the release tarball
    pub url_tar: String,
    /// Expected MD5 of the tarball (None = skip verification)
    pub checksum_tar_md5: Option<String>,
}

/// Version record from database
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct VersionRecord {
    /// Unique database ID
    pub id: VersionId,
    /// Project this release belongs to
    pub project_id: ProjectId,
    /// Version label
    pub version: String,
    /// URL of the release tarball
    pub url_tar: String,
    /// Expected MD5 of the tarball
    pub checksum_tar_md5: Option<String>,
    /// Whether the tarball has been downloaded and published
    pub downloaded: bool,
    /// Unix timestamp when the downloaded flag was set
    pub downloaded_at: Option<i64>,
}

impl VersionRecord {
    /// Expected checksum, treating an empty column as absent
    pub fn expected_checksum(&self) -> Option<&str> {
        self.checksum_tar_md5
            .as_deref()
            .map(str::trim)
            .filter(|checksum| !checksum.is_empty())
    }
}

/// Project record from database
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProjectRecord {
    /// Unique database ID
    pub id: ProjectId,
    /// Display name, used to derive the storage directory
    pub name: String,
}

/// Database handle for release-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
