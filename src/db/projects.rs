//! Project records.

use crate::error::DatabaseError;
use crate::types::ProjectId;
use crate::{Error, Result};

use super::{Database, ProjectRecord};

impl Database {
    /// Insert a project
    pub async fn insert_project(&self, name: &str) -> Result<ProjectId> {
        let result = sqlx::query("INSERT INTO projects (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert project: {}",
                    e
                )))
            })?;

        Ok(ProjectId(result.last_insert_rowid()))
    }

    /// Get a project by ID
    pub async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRecord>("SELECT id, name FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get project: {}",
                    e
                )))
            })?;

        Ok(row)
    }
}
