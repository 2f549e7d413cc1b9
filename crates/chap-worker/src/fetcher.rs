//! Video acquisition.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chap_media::{download_video, DownloadOptions};
use chap_models::VideoId;

use crate::error::{WorkerError, WorkerResult};

/// Makes a video available as a local file.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, video_id: &VideoId) -> WorkerResult<PathBuf>;
}

/// Downloads with yt-dlp into a work directory, reusing earlier downloads.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    dir: PathBuf,
    options: DownloadOptions,
}

impl YtDlpFetcher {
    pub fn new(dir: impl Into<PathBuf>, options: DownloadOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    async fn fetch(&self, video_id: &VideoId) -> WorkerResult<PathBuf> {
        download_video(video_id.as_str(), &self.dir, &self.options)
            .await
            .map_err(|e| WorkerError::download_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("abc123.mp4");
        std::fs::write(&existing, b"not really a video").unwrap();

        let fetcher = YtDlpFetcher::new(dir.path(), DownloadOptions::default());
        let path = fetcher.fetch(&VideoId::from("abc123")).await.unwrap();
        assert_eq!(path, existing);
    }
}
