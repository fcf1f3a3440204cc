//! Error types for release-dl
//!
//! This module provides the error handling for the library:
//! - A top-level [`Error`] with `From` conversions for the infrastructure crates
//! - Domain-specific errors for the record store and for the download stage
//! - Machine-readable error codes, logged as the `error_code` field and embedded
//!   in download outcome reasons

use crate::types::{DownloadState, ProjectId, VersionId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for release-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for release-dl
///
/// Each variant includes contextual information to help diagnose issues
/// without re-running the failing message.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.timeout")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Download stage error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Message broker error (declare, consume, ack, reject, publish)
    #[error("broker error: {0}")]
    Broker(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External command execution failed
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// A stage reported a fatal outcome and its worker stopped consuming
    #[error("stage {stage} halted: {reason}")]
    StageHalted {
        /// Name of the stage whose runner halted
        stage: String,
        /// The fatal reason reported by the stage
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Failures of the download stage, one variant per error exit of the state machine
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The version record referenced by the message does not exist
    #[error("version {version_id} does not exist in the version table")]
    RecordMissing {
        /// The version id carried by the message
        version_id: VersionId,
    },

    /// The project referenced by the message has no record and no configured release path
    #[error("project {project_id} does not exist and has no configured release path")]
    ProjectMissing {
        /// The project id carried by the message
        project_id: ProjectId,
    },

    /// Reading or updating the record store failed
    #[error("record store failed for version {version_id}: {reason}")]
    StoreFailed {
        /// The version being processed
        version_id: VersionId,
        /// Underlying store failure
        reason: String,
    },

    /// The remote artifact could not be fetched
    #[error("download of {url} failed (timeout {}s): {reason}", timeout.as_secs())]
    FetchFailed {
        /// The remote URL
        url: String,
        /// Timeout that was applied to the transfer
        timeout: Duration,
        /// Why the transfer failed
        reason: String,
    },

    /// The transfer reported success but no file exists at the temporary path
    #[error("file {path} does not exist after download")]
    ArtifactMissing {
        /// Where the fetched file was expected
        path: PathBuf,
    },

    /// The fetched content does not match the expected checksum
    #[error("checksums for {path} are not equal (expected {expected}, got {actual})")]
    ChecksumMismatch {
        /// The fetched file
        path: PathBuf,
        /// Checksum stored on the version record
        expected: String,
        /// Checksum computed from the file
        actual: String,
    },

    /// Creating the release directory or moving the artifact into place failed
    #[error("failed to move {from} to {to}: {reason}")]
    PublishFailed {
        /// Temporary location of the verified artifact
        from: PathBuf,
        /// Final published location
        to: PathBuf,
        /// Why the move failed
        reason: String,
    },

    /// Publishing a follow-up message failed
    #[error("failed to publish follow-up {routing_key} for version {version_id}: {reason}")]
    FollowUpFailed {
        /// The version being processed
        version_id: VersionId,
        /// Routing key of the follow-up that could not be sent
        routing_key: String,
        /// Underlying publisher failure
        reason: String,
    },
}

impl DownloadError {
    /// The error exit of the download state machine this failure corresponds to
    pub fn state(&self) -> DownloadState {
        match self {
            DownloadError::RecordMissing { .. } | DownloadError::ProjectMissing { .. } => {
                DownloadState::RecordMissing
            }
            DownloadError::StoreFailed { .. } => DownloadState::StoreFailed,
            DownloadError::FetchFailed { .. } | DownloadError::ArtifactMissing { .. } => {
                DownloadState::FetchFailed
            }
            DownloadError::ChecksumMismatch { .. } => DownloadState::VerifyFailed,
            DownloadError::PublishFailed { .. } => DownloadState::PublishFailed,
            DownloadError::FollowUpFailed { .. } => DownloadState::FollowUpFailed,
        }
    }

    /// Machine-readable error code, finer grained than [`state`](Self::state)
    pub fn error_code(&self) -> &'static str {
        match self {
            DownloadError::RecordMissing { .. } => "record_missing",
            DownloadError::ProjectMissing { .. } => "project_missing",
            DownloadError::StoreFailed { .. } => "store_failed",
            DownloadError::FetchFailed { .. } => "fetch_failed",
            DownloadError::ArtifactMissing { .. } => "artifact_missing",
            DownloadError::ChecksumMismatch { .. } => "checksum_mismatch",
            DownloadError::PublishFailed { .. } => "publish_failed",
            DownloadError::FollowUpFailed { .. } => "follow_up_failed",
        }
    }
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Download(e) => e.error_code(),
            Error::Broker(_) => "broker_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::StageHalted { .. } => "stage_halted",
            Error::Other(_) => "internal_error",
        }
    }
}
