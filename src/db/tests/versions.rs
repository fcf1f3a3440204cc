use crate::db::*;
use crate::error::{DatabaseError, Error};
use crate::types::{ProjectId, VersionId};
use tempfile::NamedTempFile;

fn new_version(checksum: Option<&str>) -> NewVersion {
    NewVersion {
        project_id: ProjectId(1),
        version: "1.2.3".to_string(),
        url_tar: "http://x/a.tgz".to_string(),
        checksum_tar_md5: checksum.map(str::to_string),
    }
}

#[tokio::test]
async fn test_insert_and_get_version() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db
        .insert_version(&new_version(Some("d41d8cd98f00b204e9800998ecf8427e")))
        .await
        .unwrap();
    let record = db.get_version(id).await.unwrap().unwrap();

    assert_eq!(record.id, id);
    assert_eq!(record.project_id, ProjectId(1));
    assert_eq!(record.version, "1.2.3");
    assert_eq!(record.url_tar, "http://x/a.tgz");
    assert_eq!(
        record.expected_checksum(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
    assert!(!record.downloaded, "new versions start not downloaded");
    assert_eq!(record.downloaded_at, None);

    db.close().await;
}

#[tokio::test]
async fn test_get_missing_version_returns_none() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.get_version(VersionId(999)).await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_set_version_downloaded_flips_flag() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_version(&new_version(None)).await.unwrap();
    db.set_version_downloaded(id).await.unwrap();

    let record = db.get_version(id).await.unwrap().unwrap();
    assert!(record.downloaded);
    assert!(record.downloaded_at.is_some());

    db.close().await;
}

#[tokio::test]
async fn test_set_version_downloaded_twice_keeps_first_timestamp() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_version(&new_version(None)).await.unwrap();
    db.set_version_downloaded(id).await.unwrap();
    sqlx::query("UPDATE versions SET downloaded_at = 1000 WHERE id = ?")
        .bind(id)
        .execute(&db.pool)
        .await
        .unwrap();

    // A redelivered message racing another worker marks the version again
    db.set_version_downloaded(id).await.unwrap();

    let record = db.get_version(id).await.unwrap().unwrap();
    assert!(record.downloaded);
    assert_eq!(record.downloaded_at, Some(1000));

    db.close().await;
}

#[tokio::test]
async fn test_set_version_downloaded_on_missing_version_fails() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db.set_version_downloaded(VersionId(77)).await;
    assert!(matches!(
        result,
        Err(Error::Database(DatabaseError::NotFound(_)))
    ));

    db.close().await;
}

#[tokio::test]
async fn test_empty_checksum_counts_as_absent() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_version(&new_version(Some("  "))).await.unwrap();
    let record = db.get_version(id).await.unwrap().unwrap();

    assert_eq!(record.expected_checksum(), None);

    db.close().await;
}
