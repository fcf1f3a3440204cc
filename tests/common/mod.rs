//! Common test utilities for release-dl integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use release_dl::db::NewVersion;
use release_dl::stage::download::{EXTRACT_ROUTING_KEY, FILESIZE_ROUTING_KEY};
use release_dl::{
    Binding, Config, Database, DownloadMessage, DownloadStage, FollowUpMessage, HttpTransfer,
    InMemoryBroker, MessageBroker, MessagePublisher, ProjectId, VersionId,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// MD5 of the empty string
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// A database, broker, HTTP origin and storage root in a temp directory
pub struct Pipeline {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub broker: Arc<InMemoryBroker>,
    pub origin: MockServer,
    pub config: Config,
}

impl Pipeline {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();

        let mut config = Config::default();
        config.storage.path = dir.path().join("storage");
        config.download.temp_dir = dir.path().join("tmp");
        config.download.timeout = Duration::from_secs(5);
        config.persistence.database_path = dir.path().join("release-dl.db");

        let db = Arc::new(Database::new(&config.persistence.database_path).await.unwrap());

        let broker = Arc::new(InMemoryBroker::new());
        for key in [EXTRACT_ROUTING_KEY, FILESIZE_ROUTING_KEY] {
            broker
                .declare(&Binding::new(key, config.queue.exchange.clone(), key))
                .await
                .unwrap();
        }

        Self {
            dir,
            db,
            broker,
            origin: MockServer::start().await,
            config,
        }
    }

    /// Serve `body` at `url_path` and register a version pointing at it
    pub async fn release(
        &self,
        project_id: ProjectId,
        version: &str,
        url_path: &str,
        body: &'static [u8],
        checksum: Option<&str>,
    ) -> VersionId {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.origin)
            .await;

        self.db
            .insert_version(&NewVersion {
                project_id,
                version: version.to_string(),
                url_tar: format!("{}{}", self.origin.uri(), url_path),
                checksum_tar_md5: checksum.map(str::to_string),
            })
            .await
            .unwrap()
    }

    pub fn stage(&self) -> DownloadStage {
        DownloadStage::new(
            self.db.clone(),
            Arc::new(HttpTransfer::new().unwrap()),
            self.broker.clone(),
            Arc::new(self.config.clone()),
        )
    }

    pub async fn send(&self, message: &DownloadMessage) {
        let payload = serde_json::to_vec(message).unwrap();
        self.broker
            .publish(&payload, &self.config.queue.exchange, "download.http")
            .await
            .unwrap();
    }

    pub async fn follow_ups(&self, routing_key: &str) -> Vec<FollowUpMessage> {
        self.broker
            .queued_payloads(routing_key)
            .await
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }

    pub fn release_file(&self, project_dir: &str, file_name: &str) -> PathBuf {
        self.config
            .storage
            .path
            .join(project_dir)
            .join("releases")
            .join(file_name)
    }

    pub fn leftover_temp_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp")).unwrap().count()
    }
}

pub fn tarball_message(project: ProjectId, version_id: VersionId) -> DownloadMessage {
    DownloadMessage {
        project,
        version_id,
        filename_prefix: Some("typo3_".to_string()),
        filename_postfix: Some(".tar.gz".to_string()),
    }
}
