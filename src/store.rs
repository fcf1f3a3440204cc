//! Record store gateway consumed by pipeline stages

use crate::Result;
use crate::db::{Database, ProjectRecord, VersionRecord};
use crate::types::{ProjectId, VersionId};
use async_trait::async_trait;

/// Typed read/update access to the records a stage works on
///
/// [`Database`] is the production implementation; tests may substitute their
/// own to inject store failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a version record; `Ok(None)` when it does not exist
    async fn find_version(&self, id: VersionId) -> Result<Option<VersionRecord>>;

    /// Mark a version as downloaded
    async fn mark_version_downloaded(&self, id: VersionId) -> Result<()>;

    /// Read a project record; `Ok(None)` when it does not exist
    async fn find_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>>;
}

#[async_trait]
impl RecordStore for Database {
    async fn find_version(&self, id: VersionId) -> Result<Option<VersionRecord>> {
        self.get_version(id).await
    }

    async fn mark_version_downloaded(&self, id: VersionId) -> Result<()> {
        self.set_version_downloaded(id).await
    }

    async fn find_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>> {
        self.get_project(id).await
    }
}
