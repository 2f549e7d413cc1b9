//! Chapter worker.
//!
//! This crate provides:
//! - The per-video pipeline (download, scan, recognize, publish)
//! - Queue consumption in one-shot and daemon modes
//! - YouTube chapter publishing and upload discovery
//! - Intermediate file output and replay

pub mod config;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod intermediate;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod scanner;
pub mod setup;
pub mod youtube;

pub use config::{WorkerConfig, WorkerMode};
pub use error::{WorkerError, WorkerResult};
pub use executor::{BatchSummary, Executor};
pub use fetcher::{VideoFetcher, YtDlpFetcher};
pub use intermediate::IntermediateStore;
pub use logging::JobLogger;
pub use pipeline::{Pipeline, ProcessOutcome, ReplayStep};
pub use scanner::{FfmpegSceneScanner, SceneScanner, SourceSceneScanner};
pub use setup::build_pipeline;
pub use youtube::{ChapterPublisher, YouTubeClient, YouTubeConfig};
