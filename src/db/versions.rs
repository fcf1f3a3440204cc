//! Version record lookup and the downloaded flag.

use crate::error::DatabaseError;
use crate::types::VersionId;
use crate::{Error, Result};

use super::{Database, NewVersion, VersionRecord};

impl Database {
    /// Insert a new version record (not yet downloaded)
    pub async fn insert_version(&self, version: &NewVersion) -> Result<VersionId> {
        let result = sqlx::query(
            r#"
            INSERT INTO versions (project_id, version, url_tar, checksum_tar_md5, downloaded)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(version.project_id)
        .bind(&version.version)
        .bind(&version.url_tar)
        .bind(&version.checksum_tar_md5)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert version: {}",
                e
            )))
        })?;

        Ok(VersionId(result.last_insert_rowid()))
    }

    /// Get a version record by ID
    pub async fn get_version(&self, id: VersionId) -> Result<Option<VersionRecord>> {
        let row = sqlx::query_as::<_, VersionRecord>(
            r#"
            SELECT
                id, project_id, version, url_tar, checksum_tar_md5,
                downloaded, downloaded_at
            FROM versions
            WHERE id = ?
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get version: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Set the downloaded flag of a version
    ///
    /// Only the first call stamps `downloaded_at`; later calls on an already
    /// downloaded version leave the row untouched. Fails with
    /// [`DatabaseError::NotFound`] when the version does not exist.
    pub async fn set_version_downloaded(&self, id: VersionId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE versions SET downloaded = 1, downloaded_at = ? WHERE id = ? AND downloaded = 0",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set version as downloaded: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            if self.get_version(id).await?.is_none() {
                return Err(Error::Database(DatabaseError::NotFound(format!(
                    "version {}",
                    id
                ))));
            }
            tracing::debug!(version_id = id.0, "version already marked downloaded");
            return Ok(());
        }

        tracing::info!(version_id = id.0, "set version as downloaded");
        Ok(())
    }
}
