//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::matcher::Detection;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during decoding and scene detection.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Failed to decode frame {frame_index}: {message}")]
    Decode { frame_index: u64, message: String },

    #[error("Invalid detection configuration: {0}")]
    Config(String),

    #[error("Pattern '{name}' ({pattern_width}x{pattern_height}) is larger than the searched region ({region_width}x{region_height})")]
    PatternTooLarge {
        name: String,
        pattern_width: u32,
        pattern_height: u32,
        region_width: u32,
        region_height: u32,
    },

    #[error("Scan aborted at frame {frame_index} with {} partial detections: {source}", partial.len())]
    ScanAborted {
        frame_index: u64,
        partial: Vec<Detection>,
        #[source]
        source: Box<MediaError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a frame decode error.
    pub fn decode(frame_index: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            frame_index,
            message: message.into(),
        }
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Configuration problems are fatal at startup and never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MediaError::Config(_) | MediaError::PatternTooLarge { .. } | MediaError::Image(_)
        )
    }

    /// Detections salvaged from an aborted scan, if any.
    pub fn partial_detections(&self) -> &[Detection] {
        match self {
            MediaError::ScanAborted { partial, .. } => partial,
            _ => &[],
        }
    }

    /// Take ownership of salvaged detections.
    pub fn into_partial_detections(self) -> Vec<Detection> {
        match self {
            MediaError::ScanAborted { partial, .. } => partial,
            _ => Vec::new(),
        }
    }
}
