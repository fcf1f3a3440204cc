use crate::db::*;
use crate::types::VersionId;
use tempfile::NamedTempFile;

/// Querying after the pool was closed must surface an error rather than hang or panic.
#[tokio::test]
async fn test_get_version_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.get_version(VersionId(1)).await;
    assert!(result.is_err(), "query on a closed pool should fail");
}
