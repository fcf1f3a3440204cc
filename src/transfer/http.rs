//! reqwest-backed artifact transfer

use super::ArtifactTransfer;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Read buffer for hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// HTTP(S) artifact transfer
///
/// The response body is streamed to disk chunk by chunk; the whole transfer
/// (connect, headers, body) is bounded by the timeout passed to `fetch`.
#[derive(Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
}

impl HttpTransfer {
    /// Create a transfer with a default client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("release-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Create a transfer around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn stream_to_file(&self, url: url::Url, destination: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .inspect_err(|e| {
                if e.is_connect() {
                    debug!(%url, error = %e, "connection failed");
                }
            })?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }

    /// Copy into a hidden sibling of `to`, then rename it into place.
    async fn copy_then_rename(from: &Path, to: &Path) -> Result<()> {
        let file_name = to
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = to.with_file_name(format!(
            ".{}.{:016x}.part",
            file_name,
            rand::random::<u64>()
        ));

        if let Err(e) = tokio::fs::copy(from, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::rename(&staging, to).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::remove_file(from).await {
            warn!(?from, error = %e, "failed to remove source after cross-device move");
        }

        Ok(())
    }
}

#[async_trait]
impl ArtifactTransfer for HttpTransfer {
    async fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<()> {
        let parsed = url::Url::parse(url).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid URL '{}': {}", url, e),
            ))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Unsupported URL scheme '{}' in '{}'", parsed.scheme(), url),
            )));
        }

        debug!(%url, ?destination, timeout_secs = timeout.as_secs(), "starting transfer");

        let result =
            match tokio::time::timeout(timeout, self.stream_to_file(parsed, destination)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "Timeout fetching '{}' (exceeded {} seconds)",
                        url,
                        timeout.as_secs_f64()
                    ),
                ))),
            };

        match result {
            Ok(bytes) => {
                debug!(%url, ?destination, bytes, "transfer complete");
                Ok(())
            }
            Err(e) => {
                self.discard(destination).await;
                Err(e)
            }
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_file())
    }

    async fn content_hash(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut file = std::fs::File::open(&path)?;
            let mut context = md5::Context::new();
            let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                context.consume(&buffer[..read]);
            }

            Ok(format!("{:x}", context.compute()))
        })
        .await
        .map_err(|e| Error::Other(format!("hashing task failed: {}", e)))?
    }

    async fn move_to(&self, from: &Path, to: &Path) -> Result<()> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                debug!(?from, ?to, "rename crosses devices, copying instead");
                Self::copy_then_rename(from, to).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(?path, "discarded transient file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(?path, error = %e, "failed to discard transient file"),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[tokio::test]
    async fn fetch_streams_body_to_destination() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.tgz.part");
        let transfer = HttpTransfer::new().unwrap();

        transfer
            .fetch(
                &format!("{}/a.tgz", mock_server.uri()),
                &dest,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert!(transfer.exists(&dest).await);
    }

    #[tokio::test]
    async fn fetch_rejects_non_success_status_and_leaves_no_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.tgz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.tgz.part");
        let transfer = HttpTransfer::new().unwrap();

        let result = transfer
            .fetch(
                &format!("{}/missing.tgz", mock_server.uri()),
                &dest,
                Duration::from_secs(5),
            )
            .await;

        match result {
            Err(Error::Network(e)) => {
                assert_eq!(e.status(), Some(reqwest::StatusCode::NOT_FOUND));
                assert!(e.to_string().contains("404"), "unexpected error: {e}");
            }
            other => panic!("expected network error, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_from_closed_port_is_a_connect_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("refused.tgz.part");
        let transfer = HttpTransfer::new().unwrap();

        let result = transfer
            .fetch(
                &format!("http://127.0.0.1:{port}/refused.tgz"),
                &dest,
                Duration::from_secs(5),
            )
            .await;

        match result {
            Err(Error::Network(e)) => assert!(e.is_connect(), "unexpected error: {e}"),
            other => panic!("expected network error, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_times_out_on_slow_server() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.tgz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.tgz.part");
        let transfer = HttpTransfer::new().unwrap();

        let result = transfer
            .fetch(
                &format!("{}/slow.tgz", mock_server.uri()),
                &dest,
                Duration::from_millis(200),
            )
            .await;

        match result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_rejects_invalid_and_non_http_urls() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.part");
        let transfer = HttpTransfer::new().unwrap();

        assert!(
            transfer
                .fetch("not a url", &dest, Duration::from_secs(1))
                .await
                .is_err()
        );
        assert!(
            transfer
                .fetch("ftp://example.com/a.tgz", &dest, Duration::from_secs(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn content_hash_is_lowercase_md5() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let abc = dir.path().join("abc");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&abc, b"abc").unwrap();

        let transfer = HttpTransfer::new().unwrap();

        assert_eq!(transfer.content_hash(&empty).await.unwrap(), EMPTY_MD5);
        assert_eq!(
            transfer.content_hash(&abc).await.unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[tokio::test]
    async fn content_hash_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = HttpTransfer::new().unwrap();

        assert!(
            transfer
                .content_hash(&dir.path().join("nope"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn exists_is_false_for_directories_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = HttpTransfer::new().unwrap();

        assert!(!transfer.exists(dir.path()).await);
        assert!(!transfer.exists(&dir.path().join("nope")).await);
    }

    #[tokio::test]
    async fn move_to_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("new.part");
        let to = dir.path().join("final.tgz");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"stale").unwrap();

        let transfer = HttpTransfer::new().unwrap();
        transfer.move_to(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
    }

    #[tokio::test]
    async fn move_to_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("new.part");
        std::fs::write(&from, b"new").unwrap();

        let transfer = HttpTransfer::new().unwrap();
        let result = transfer
            .move_to(&from, &dir.path().join("no").join("such").join("dir.tgz"))
            .await;

        assert!(result.is_err());
        assert!(from.exists(), "source must survive a failed move");
    }

    #[tokio::test]
    async fn copy_then_rename_moves_content_and_cleans_up() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let from = src_dir.path().join("a.part");
        let to = dst_dir.path().join("a.tgz");
        std::fs::write(&from, b"payload").unwrap();

        HttpTransfer::copy_then_rename(&from, &to).await.unwrap();

        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
        assert!(!from.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dst_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "staging file left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn discard_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = HttpTransfer::new().unwrap();
        let file = dir.path().join("x.part");
        std::fs::write(&file, b"x").unwrap();

        transfer.discard(&file).await;
        assert!(!file.exists());
        transfer.discard(&file).await;
    }
}
