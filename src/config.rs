//! Configuration types for release-dl

use crate::error::{Error, Result};
use crate::types::{FailurePolicy, ProjectId};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

/// Artifact transfer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound for a single artifact transfer (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Directory for in-flight downloads (default: the system temp directory)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: default_download_timeout(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// Per-project naming and placement overrides
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory receiving this project's releases, replacing `<storage>/<project>/releases`
    #[serde(default)]
    pub releases_path: Option<PathBuf>,

    /// Filename prefix used when a message does not carry one
    #[serde(default)]
    pub filename_prefix: Option<String>,

    /// Filename postfix used when a message does not carry one
    #[serde(default)]
    pub filename_postfix: Option<String>,
}

/// Where published artifacts live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root (default: "./storage")
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Per-project overrides, keyed by project id
    #[serde(default)]
    pub projects: HashMap<i64, ProjectConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            projects: HashMap::new(),
        }
    }
}

impl StorageConfig {
    /// Overrides configured for a project, if any
    pub fn project(&self, id: ProjectId) -> Option<&ProjectConfig> {
        self.projects.get(&id.get())
    }
}

/// Queue topology settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Exchange that input queues bind to and follow-ups are published on (default: "analysis")
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Route rejected messages to a dead-letter queue (default: true)
    #[serde(default = "default_true")]
    pub dead_lettering: bool,

    /// Declare queues as durable (default: true)
    #[serde(default = "default_true")]
    pub durable: bool,

    /// Unacknowledged deliveries a consumer may hold (default: 1)
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            dead_lettering: true,
            durable: true,
            prefetch_count: default_prefetch_count(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./release-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for pipeline stages
///
/// Every field has a default, so `{}` is a valid configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Artifact placement
    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue topology
    #[serde(default)]
    pub queue: QueueConfig,

    /// How stages report failures (default: fail fast)
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Record store location
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Read a JSON configuration file and validate it
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;

        let config: Config = serde_json::from_slice(&content).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.download.timeout.is_zero() {
            return Err(Error::Config {
                message: "download timeout must be greater than zero".to_string(),
                key: Some("download.timeout".to_string()),
            });
        }

        if self.queue.exchange.trim().is_empty() {
            return Err(Error::Config {
                message: "exchange name must not be empty".to_string(),
                key: Some("queue.exchange".to_string()),
            });
        }

        if self.queue.prefetch_count == 0 {
            return Err(Error::Config {
                message: "prefetch count must be at least 1".to_string(),
                key: Some("queue.prefetch_count".to_string()),
            });
        }

        Ok(())
    }
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_exchange() -> String {
    "analysis".to_string()
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./release-dl.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.download.timeout, Duration::from_secs(300));
        assert_eq!(config.storage.path, PathBuf::from("./storage"));
        assert_eq!(config.queue.exchange, "analysis");
        assert!(config.queue.dead_lettering, "dead lettering is on unless disabled");
        assert!(config.queue.durable);
        assert_eq!(config.queue.prefetch_count, 1);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        config.validate().unwrap();
    }

    #[test]
    fn config_default_survives_json_round_trip() {
        let mut original = Config::default();
        original.storage.projects.insert(
            4,
            ProjectConfig {
                releases_path: Some(PathBuf::from("/srv/releases")),
                filename_prefix: Some("typo3_".into()),
                filename_postfix: Some(".tar.gz".into()),
            },
        );

        let json = serde_json::to_string(&original).expect("Config must serialize to JSON");
        let restored: Config =
            serde_json::from_str(&json).expect("Config must deserialize from its own JSON");

        assert_eq!(restored.download.timeout, original.download.timeout);
        assert_eq!(restored.download.temp_dir, original.download.temp_dir);
        assert_eq!(
            restored.persistence.database_path,
            original.persistence.database_path
        );
        let project = restored.storage.project(ProjectId(4)).unwrap();
        assert_eq!(project.releases_path, Some(PathBuf::from("/srv/releases")));
        assert_eq!(project.filename_prefix.as_deref(), Some("typo3_"));
    }

    #[test]
    fn duration_serde_uses_seconds() {
        let config: Config = serde_json::from_str(r#"{"download":{"timeout":45}}"#).unwrap();
        assert_eq!(config.download.timeout, Duration::from_secs(45));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["download"]["timeout"], 45);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config: Config = serde_json::from_str(r#"{"download":{"timeout":0}}"#).unwrap();

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("download.timeout")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_blank_exchange_and_zero_prefetch() {
        let mut config = Config::default();
        config.queue.exchange = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue.prefetch_count = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("queue.prefetch_count"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn from_json_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"failure_policy":"dead_letter","queue":{"dead_lettering":false}}"#,
        )
        .await
        .unwrap();

        let config = Config::from_json_file(&path).await.unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::DeadLetter);
        assert!(!config.queue.dead_lettering);

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            Config::from_json_file(&path).await,
            Err(Error::Config { .. })
        ));
    }
}
