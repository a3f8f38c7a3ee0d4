//! # Media Retriever
//!
//! Fetches a remote media URL into a uniquely named temporary file. Network
//! trouble, non-success statuses and oversized bodies all surface as
//! `Retrieval` errors, which the executor converts into a `failed` job -
//! retrieval problems must never crash the service or strand a job in
//! `processing`.

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};
use anyhow::Result;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A downloaded media file that cleans up after itself.
///
/// ## Why RAII:
/// The executor must remove a job's temporary file exactly once, whether the
/// job completed, failed to decode, or failed to transcribe. Tying removal to
/// `Drop` makes that guarantee structural instead of depending on every error
/// path remembering to call a cleanup function.
#[derive(Debug)]
pub struct TempAudioFile {
    path: PathBuf,
}

impl TempAudioFile {
    /// Reserve a unique path inside `dir`. Nothing is created on disk yet;
    /// the retriever writes the download into it.
    fn allocate(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("media-{}.download", Uuid::new_v4())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Test-only constructor so executor tests can hand in files they wrote
    /// themselves.
    #[cfg(test)]
    pub(crate) fn for_tests(dir: &Path) -> Self {
        Self::allocate(dir)
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary media file {}", self.path.display()),
            // Never created (download failed before the first byte) - fine.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove temporary media file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// HTTP client for resolving remote media submissions.
pub struct MediaRetriever {
    client: reqwest::Client,
    max_bytes: u64,
    download_dir: PathBuf,
}

impl MediaRetriever {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_download_bytes,
            download_dir: std::env::temp_dir(),
        })
    }

    /// Download `url` into a temporary file.
    ///
    /// The body is streamed chunk by chunk rather than buffered in memory,
    /// and the running total is checked against the configured size cap. On
    /// any error the returned guard is dropped and the partial file removed.
    pub async fn fetch(&self, url: &str) -> AppResult<TempAudioFile> {
        debug!("Fetching remote media from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("request for {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Retrieval(format!(
                "{} answered with status {}",
                url, status
            )));
        }

        let temp = TempAudioFile::allocate(&self.download_dir);
        let mut file = tokio::fs::File::create(temp.path()).await?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                AppError::Retrieval(format!("download from {} broke off: {}", url, e))
            })?;

            downloaded += chunk.len() as u64;
            if downloaded > self.max_bytes {
                return Err(AppError::Retrieval(format!(
                    "media at {} exceeds the {} byte download limit",
                    url, self.max_bytes
                )));
            }

            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        debug!("Downloaded {} bytes from {}", downloaded, url);

        Ok(temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MediaConfig {
        MediaConfig {
            request_timeout_secs: 5,
            max_download_bytes: 1024,
        }
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempAudioFile::allocate(dir.path());
        std::fs::write(temp.path(), b"audio bytes").unwrap();
        let path = temp.path().to_path_buf();

        assert!(path.exists());
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_dropping_unwritten_guard_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempAudioFile::allocate(dir.path());
        // Never written to disk; dropping must not panic or warn spuriously.
        drop(temp);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_retrieval_error() {
        let retriever = MediaRetriever::new(&test_config()).unwrap();

        // Port 1 on loopback refuses connections immediately.
        let err = retriever
            .fetch("http://127.0.0.1:1/clip.wav")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Retrieval(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_nonsense_url_is_a_retrieval_error() {
        let retriever = MediaRetriever::new(&test_config()).unwrap();
        let err = retriever.fetch("not a url at all").await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }
}
