//! Core types for release-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declares an `i64` newtype identifier usable as a SQLite column value.
macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

record_id!(
    /// Identifier of a tracked project (primary key of the `projects` table)
    ProjectId
);

record_id!(
    /// Identifier of a version record (primary key of the `versions` table)
    VersionId
);

/// Inbound unit of work for the download stage
///
/// ```json
/// { "project": 1, "versionId": 7, "filenamePrefix": "typo3_", "filenamePostfix": ".tar.gz" }
/// ```
///
/// Prefix and postfix may be omitted, in which case the project's configured
/// naming policy supplies them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMessage {
    /// Project the version belongs to
    pub project: ProjectId,
    /// Version record to download
    pub version_id: VersionId,
    /// Prefix of the published filename
    #[serde(default)]
    pub filename_prefix: Option<String>,
    /// Postfix of the published filename
    #[serde(default)]
    pub filename_postfix: Option<String>,
}

/// Work item emitted after a successful download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpMessage {
    /// Project the version belongs to
    pub project: ProjectId,
    /// Downloaded version record
    pub version_id: VersionId,
    /// Final published path of the artifact
    pub filename: PathBuf,
}

/// States of the download state machine
///
/// Happy path: `Received → RecordLookup → Fetching → Verifying → Publishing → Completed`.
/// `AlreadyDone` is the idempotent short-circuit; the remaining variants are error exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Message decoded, nothing done yet
    Received,
    /// Reading the version record
    RecordLookup,
    /// Record already marked downloaded; nothing to do
    AlreadyDone,
    /// Transferring the remote artifact
    Fetching,
    /// Comparing the artifact checksum
    Verifying,
    /// Moving the artifact to its final path
    Publishing,
    /// Record updated and follow-ups sent
    Completed,
    /// Version (or project) record does not exist
    RecordMissing,
    /// Record store read or update failed
    StoreFailed,
    /// Transfer failed or produced no file
    FetchFailed,
    /// Checksum mismatch
    VerifyFailed,
    /// Directory creation or move failed
    PublishFailed,
    /// Follow-up publication failed
    FollowUpFailed,
}

impl DownloadState {
    /// Whether this state is one of the error exits
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DownloadState::RecordMissing
                | DownloadState::StoreFailed
                | DownloadState::FetchFailed
                | DownloadState::VerifyFailed
                | DownloadState::PublishFailed
                | DownloadState::FollowUpFailed
        )
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadState::Received => "received",
            DownloadState::RecordLookup => "record_lookup",
            DownloadState::AlreadyDone => "already_done",
            DownloadState::Fetching => "fetching",
            DownloadState::Verifying => "verifying",
            DownloadState::Publishing => "publishing",
            DownloadState::Completed => "completed",
            DownloadState::RecordMissing => "record_missing",
            DownloadState::StoreFailed => "store_failed",
            DownloadState::FetchFailed => "fetch_failed",
            DownloadState::VerifyFailed => "verify_failed",
            DownloadState::PublishFailed => "publish_failed",
            DownloadState::FollowUpFailed => "follow_up_failed",
        };
        f.write_str(name)
    }
}

/// How a stage reports failures back to its runner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Surface a fatal error; the worker stops consuming
    #[default]
    FailFast,
    /// Reject the message so the broker dead-letters (or discards) it; keep consuming
    DeadLetter,
}

/// Events broadcast by a stage runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Input queue declared and bound
    Bound {
        /// Queue name
        queue: String,
        /// Consumer tag of the runner
        consumer_tag: String,
    },
    /// A delivery was received
    Received {
        /// Broker delivery tag
        delivery_tag: u64,
        /// Whether the broker flagged the delivery as a redelivery
        redelivered: bool,
    },
    /// A delivery was acknowledged
    Acknowledged {
        /// Broker delivery tag
        delivery_tag: u64,
    },
    /// A delivery was rejected
    Rejected {
        /// Broker delivery tag
        delivery_tag: u64,
        /// Reason reported by the stage (or the decoder)
        reason: String,
        /// Whether the message was returned to the queue
        requeued: bool,
    },
    /// The runner stopped after a fatal outcome
    Halted {
        /// Fatal reason reported by the stage
        reason: String,
    },
}
