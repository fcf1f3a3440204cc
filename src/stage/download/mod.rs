//! Download stage: fetch a release tarball, verify it, publish it, announce it
//!
//! Consumes [`DownloadMessage`]s from `download.http`. For each message the
//! stage walks a small state machine:
//!
//! ```text
//! Received → RecordLookup ─┬─ AlreadyDone
//!                          └─ Fetching → Verifying → Publishing → Completed
//! ```
//!
//! The artifact is fetched to a unique temporary file, verified there, and
//! only then moved to `<storage>/<project>/releases/<prefix><version><postfix>`.
//! On completion the version record is marked downloaded and two follow-ups
//! ([`EXTRACT_ROUTING_KEY`], [`FILESIZE_ROUTING_KEY`]) carry the final path.
//!
//! A record already marked downloaded is acknowledged without any I/O. A file
//! already at the final path with the expected checksum is reused.

pub mod naming;


use super::{Binding, Outcome, QueueOptions, Stage};
use crate::broker::{MessagePublisher, publish_json};
use crate::config::Config;
use crate::db::VersionRecord;
use crate::error::DownloadError;
use crate::store::RecordStore;
use crate::transfer::{ArtifactTransfer, checksums_match, ensure_directory, temp_artifact_path};
use crate::types::{
    DownloadMessage, DownloadState, FailurePolicy, FollowUpMessage, ProjectId, VersionId,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Input queue and routing key of the download stage
pub const DOWNLOAD_QUEUE: &str = "download.http";

/// Follow-up asking for the tarball to be extracted
pub const EXTRACT_ROUTING_KEY: &str = "extract.targz";

/// Follow-up asking for the tarball size to be recorded
pub const FILESIZE_ROUTING_KEY: &str = "analysis.filesize";

type StepResult<T> = std::result::Result<T, DownloadError>;

/// Downloads release tarballs referenced by version records
///
/// Holds no per-message state; one instance can serve any number of runners.
pub struct DownloadStage {
    store: Arc<dyn RecordStore>,
    transfer: Arc<dyn ArtifactTransfer>,
    publisher: Arc<dyn MessagePublisher>,
    config: Arc<Config>,
    policy: FailurePolicy,
}

impl DownloadStage {
    /// Create the stage with the failure policy from `config`
    pub fn new(
        store: Arc<dyn RecordStore>,
        transfer: Arc<dyn ArtifactTransfer>,
        publisher: Arc<dyn MessagePublisher>,
        config: Arc<Config>,
    ) -> Self {
        let policy = config.failure_policy;
        Self {
            store,
            transfer,
            publisher,
            config,
            policy,
        }
    }

    /// Override the failure policy
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active failure policy
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run the state machine for one message
    ///
    /// Returns the successful terminal state ([`DownloadState::AlreadyDone`] or
    /// [`DownloadState::Completed`]); every error exit is a [`DownloadError`].
    pub async fn execute(&self, message: &DownloadMessage) -> StepResult<DownloadState> {
        let version_id = message.version_id;

        debug!(%version_id, state = %DownloadState::RecordLookup, "looking up version record");
        let record = match self.store.find_version(version_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(DownloadError::RecordMissing { version_id }),
            Err(e) => {
                return Err(DownloadError::StoreFailed {
                    version_id,
                    reason: e.to_string(),
                });
            }
        };

        if record.downloaded {
            info!(%version_id, "record marked as already downloaded");
            return Ok(DownloadState::AlreadyDone);
        }

        let file_name = self.file_name(message, &record);
        let release_dir = self.release_directory(message.project, version_id).await?;
        let target = release_dir.join(&file_name);

        if self.reusable(&record, &target).await {
            info!(%version_id, target_file = ?target, "file already exists");
            self.complete(message, &record, &target).await?;
            return Ok(DownloadState::Completed);
        }

        let temp = temp_artifact_path(&self.config.download.temp_dir, &file_name);
        let result = self.fetch_verify_publish(&record, &temp, &release_dir, &target).await;
        if result.is_err() {
            self.transfer.discard(&temp).await;
        }
        result?;

        self.complete(message, &record, &target).await?;
        Ok(DownloadState::Completed)
    }

    /// Filename from the message's naming fields, falling back to the project's configuration
    fn file_name(&self, message: &DownloadMessage, record: &VersionRecord) -> String {
        let project = self.config.storage.project(message.project);
        let prefix = message
            .filename_prefix
            .as_deref()
            .or_else(|| project.and_then(|p| p.filename_prefix.as_deref()))
            .unwrap_or_default();
        let postfix = message
            .filename_postfix
            .as_deref()
            .or_else(|| project.and_then(|p| p.filename_postfix.as_deref()))
            .unwrap_or_default();

        naming::release_file_name(prefix, &record.version, postfix)
    }

    async fn release_directory(
        &self,
        project_id: ProjectId,
        version_id: VersionId,
    ) -> StepResult<PathBuf> {
        if let Some(path) = self
            .config
            .storage
            .project(project_id)
            .and_then(|p| p.releases_path.clone())
        {
            return Ok(path);
        }

        match self.store.find_project(project_id).await {
            Ok(Some(project)) => Ok(naming::release_directory(
                &self.config.storage.path,
                &project.name,
            )),
            Ok(None) => Err(DownloadError::ProjectMissing { project_id }),
            Err(e) => Err(DownloadError::StoreFailed {
                version_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Whether the file at `target` already has the expected checksum
    async fn reusable(&self, record: &VersionRecord, target: &Path) -> bool {
        let Some(expected) = record.expected_checksum() else {
            return false;
        };
        if !self.transfer.exists(target).await {
            return false;
        }

        match self.transfer.content_hash(target).await {
            Ok(actual) if checksums_match(expected, &actual) => true,
            Ok(actual) => {
                debug!(target_file = ?target, expected, %actual, "existing file differs, downloading again");
                false
            }
            Err(e) => {
                warn!(target_file = ?target, error = %e, "could not hash existing file, downloading again");
                false
            }
        }
    }

    async fn fetch_verify_publish(
        &self,
        record: &VersionRecord,
        temp: &Path,
        release_dir: &Path,
        target: &Path,
    ) -> StepResult<()> {
        let timeout = self.config.download.timeout;

        info!(
            version_id = %record.id,
            download_url = %record.url_tar,
            target_download_file = ?temp,
            state = %DownloadState::Fetching,
            "starting download"
        );
        self.transfer
            .fetch(&record.url_tar, temp, timeout)
            .await
            .map_err(|e| DownloadError::FetchFailed {
                url: record.url_tar.clone(),
                timeout,
                reason: e.to_string(),
            })?;

        if !self.transfer.exists(temp).await {
            return Err(DownloadError::ArtifactMissing {
                path: temp.to_path_buf(),
            });
        }

        match record.expected_checksum() {
            Some(expected) => {
                debug!(version_id = %record.id, state = %DownloadState::Verifying, "verifying checksum");
                let actual = self.transfer.content_hash(temp).await.map_err(|e| {
                    DownloadError::FetchFailed {
                        url: record.url_tar.clone(),
                        timeout,
                        reason: format!("fetched file is unreadable: {}", e),
                    }
                })?;
                if !checksums_match(expected, &actual) {
                    return Err(DownloadError::ChecksumMismatch {
                        path: temp.to_path_buf(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            None => debug!(version_id = %record.id, "no checksum on record, skipping verification"),
        }

        let publish_failed = |reason: String| DownloadError::PublishFailed {
            from: temp.to_path_buf(),
            to: target.to_path_buf(),
            reason,
        };

        ensure_directory(release_dir)
            .await
            .map_err(|e| publish_failed(e.to_string()))?;

        info!(
            old_file = ?temp,
            new_file = ?target,
            state = %DownloadState::Publishing,
            "rename downloaded file"
        );
        self.transfer
            .move_to(temp, target)
            .await
            .map_err(|e| publish_failed(e.to_string()))
    }

    /// Mark the record downloaded, then announce the published artifact
    async fn complete(
        &self,
        message: &DownloadMessage,
        record: &VersionRecord,
        target: &Path,
    ) -> StepResult<()> {
        self.store
            .mark_version_downloaded(record.id)
            .await
            .map_err(|e| DownloadError::StoreFailed {
                version_id: record.id,
                reason: e.to_string(),
            })?;

        let follow_up = FollowUpMessage {
            project: message.project,
            version_id: record.id,
            filename: target.to_path_buf(),
        };
        let exchange = &self.config.queue.exchange;

        for routing_key in [EXTRACT_ROUTING_KEY, FILESIZE_ROUTING_KEY] {
            publish_json(self.publisher.as_ref(), &follow_up, exchange, routing_key)
                .await
                .map_err(|e| DownloadError::FollowUpFailed {
                    version_id: record.id,
                    routing_key: routing_key.to_string(),
                    reason: e.to_string(),
                })?;
        }

        debug!(version_id = %record.id, filename = ?target, "follow-up messages published");
        Ok(())
    }
}

/// Log a failed message at critical severity with the context of its exit
/// Outcome reason: exit state, error code, then the message
fn failure_reason(err: &DownloadError) -> String {
    format!("{} [{}]: {}", err.state(), err.error_code(), err)
}

fn log_failure(message: &DownloadMessage, err: &DownloadError) {
    let version_id = message.version_id;
    let project = message.project;
    let state = err.state();
    let error_code = err.error_code();

    match err {
        DownloadError::RecordMissing { .. } | DownloadError::ProjectMissing { .. } => {
            error!(severity = "critical", %version_id, %project, %state, error_code, error = %err, "record does not exist");
        }
        DownloadError::StoreFailed { reason, .. } => {
            error!(severity = "critical", %version_id, %state, error_code, %reason, "record store failed");
        }
        DownloadError::FetchFailed { url, timeout, reason } => {
            error!(
                severity = "critical",
                %version_id,
                file = %url,
                timeout_secs = timeout.as_secs(),
                %reason,
                %state,
                error_code,
                "download command failed"
            );
        }
        DownloadError::ArtifactMissing { path } => {
            error!(severity = "critical", %version_id, target_file = ?path, %state, error_code, "file does not exist after download");
        }
        DownloadError::ChecksumMismatch {
            path,
            expected,
            actual,
        } => {
            error!(
                severity = "critical",
                %version_id,
                target_file = ?path,
                database_hash = %expected,
                file_hash = %actual,
                %state,
                error_code,
                "checksums for file are not equal"
            );
        }
        DownloadError::PublishFailed { from, to, reason } => {
            error!(
                severity = "critical",
                %version_id,
                old_file = ?from,
                new_file = ?to,
                %reason,
                %state,
                error_code,
                "rename operation failed, rights issue?"
            );
        }
        DownloadError::FollowUpFailed {
            routing_key,
            reason,
            ..
        } => {
            error!(severity = "critical", %version_id, %routing_key, %reason, %state, error_code, "follow-up publication failed");
        }
    }
}

#[async_trait]
impl Stage for DownloadStage {
    type Message = DownloadMessage;

    fn name(&self) -> &str {
        DOWNLOAD_QUEUE
    }

    fn describe(&self) -> &str {
        "Downloads a HTTP resource"
    }

    fn binding(&self) -> Binding {
        let queue = &self.config.queue;
        let mut binding = Binding::new(DOWNLOAD_QUEUE, queue.exchange.clone(), DOWNLOAD_QUEUE)
            .with_options(QueueOptions {
                durable: queue.durable,
                prefetch_count: queue.prefetch_count,
            });
        if queue.dead_lettering {
            binding.enable_dead_lettering();
        }
        binding
    }

    async fn process(&self, message: DownloadMessage) -> Outcome {
        info!(
            project = %message.project,
            version_id = %message.version_id,
            state = %DownloadState::Received,
            "receiving message"
        );

        match self.execute(&message).await {
            Ok(state) => {
                info!(version_id = %message.version_id, %state, "finish processing message");
                Outcome::Completed
            }
            Err(err) => {
                log_failure(&message, &err);
                Outcome::failure(self.policy, failure_reason(&err))
            }
        }
    }
}
