//! Frame decoding and round-start scene detection.
//!
//! This crate provides:
//! - Seekable frame sources (ffmpeg pipe, in-memory, optional OpenCV)
//! - Edge-map preprocessing and normalized cross-correlation
//! - The scene scanner with decoy rejection, dedup and lookahead validation
//! - Recognition frame selection
//! - Detection profiles
//! - ffprobe and yt-dlp helpers

pub mod correlation;
pub mod download;
pub mod error;
pub mod frame_source;
pub mod matcher;
pub mod metrics;
pub mod params;
pub mod pattern;
pub mod preprocess;
pub mod probe;
pub mod region;
pub mod selector;

pub use download::{download_video, fetch_video_info, DownloadOptions, RemoteVideoInfo};
pub use error::{MediaError, MediaResult};
pub use frame_source::{CursorGuard, FfmpegFrameSource, FrameSource, MemoryFrameSource};
#[cfg(feature = "opencv")]
pub use frame_source::OpenCvFrameSource;
pub use matcher::{AbortPolicy, Detection, ScanOutcome, ScanStats, ScanWindow, SceneMatcher};
pub use params::{available_profiles, DetectionParameters, DEFAULT_PROFILE, PROFILE_ENV};
pub use pattern::ReferencePattern;
pub use probe::{probe_video, VideoInfo};
pub use region::Region;
pub use selector::{OffsetChoice, RecognitionFrameSelector, SelectedFrame};
