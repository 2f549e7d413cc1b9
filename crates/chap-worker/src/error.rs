//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("YouTube API error: {0}")]
    YouTube(String),

    #[error("Intermediate results missing: {0}")]
    MissingIntermediate(String),

    #[error("Ledger update failed: {0}")]
    LedgerFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] chap_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] chap_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] chap_media::MediaError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] chap_recognition::RecognitionError),

    #[error("Queue error: {0}")]
    Queue(#[from] chap_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn youtube(msg: impl Into<String>) -> Self {
        Self::YouTube(msg.into())
    }

    pub fn missing_intermediate(msg: impl Into<String>) -> Self {
        Self::MissingIntermediate(msg.into())
    }

    pub fn ledger_failed(msg: impl Into<String>) -> Self {
        Self::LedgerFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DownloadFailed(_)
            | WorkerError::LedgerFailed(_)
            | WorkerError::Storage(_)
            | WorkerError::Http(_) => true,
            WorkerError::Firestore(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Recognition(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// These are errors where retrying won't help: the video itself is
    /// inaccessible (private, removed, region blocked, still live).
    pub fn is_permanent_failure(&self) -> bool {
        if matches!(
            self,
            WorkerError::ConfigError(_)
                | WorkerError::InvalidMessage(_)
                | WorkerError::MissingIntermediate(_)
        ) {
            return true;
        }

        let msg = self.to_string().to_lowercase();

        if msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")) {
            return true;
        }
        if msg.contains("private video") || msg.contains("video is private") {
            return true;
        }
        if msg.contains("video unavailable")
            || msg.contains("video is unavailable")
            || msg.contains("video not available")
        {
            return true;
        }
        if msg.contains("video has been removed") || msg.contains("video was deleted") {
            return true;
        }
        if msg.contains("not available in your country") || msg.contains("blocked in your country")
        {
            return true;
        }
        if msg.contains("live stream") || msg.contains("live event") {
            return true;
        }
        if msg.contains("premiere") && msg.contains("will begin") {
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failures() {
        assert!(WorkerError::download_failed("yt-dlp failed: ERROR: Private video").is_permanent_failure());
        assert!(WorkerError::download_failed("ERROR: Video unavailable").is_permanent_failure());
        assert!(WorkerError::config_error("bad profile").is_permanent_failure());
        assert!(WorkerError::missing_intermediate("no matches.json").is_permanent_failure());
        assert!(!WorkerError::download_failed("HTTP Error 503").is_permanent_failure());
    }

    #[test]
    fn test_retryable() {
        assert!(WorkerError::download_failed("timeout").is_retryable());
        assert!(!WorkerError::youtube("quotaExceeded").is_retryable());
        assert!(!WorkerError::config_error("x").is_retryable());
    }
}
