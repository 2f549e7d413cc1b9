//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chap_media::{AbortPolicy, DEFAULT_PROFILE};

use crate::error::{WorkerError, WorkerResult};

/// How the worker consumes the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Pull one batch, process it and exit.
    #[default]
    Once,
    /// Keep consuming until shutdown.
    Daemon,
}

impl FromStr for WorkerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(WorkerMode::Once),
            "daemon" | "forever" | "stream" => Ok(WorkerMode::Daemon),
            other => Err(format!("unknown worker mode: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    /// Downloaded videos
    pub work_dir: PathBuf,
    /// Per-video detection summaries, frames and final results
    pub intermediate_dir: PathBuf,
    /// Offline result files when R2 is disabled
    pub output_dir: PathBuf,
    /// Detection profile file
    pub detection_config_path: PathBuf,
    /// Profile name; `DETECTION_PROFILE` still overrides it at load time
    pub detection_profile: String,
    pub aliases_path: PathBuf,
    pub abort_policy: AbortPolicy,
    /// Save the recognition frame of every detection as PNG
    pub save_frames: bool,
    pub enable_r2: bool,
    pub enable_youtube: bool,
    pub enable_firestore: bool,
    /// Messages pulled per batch
    pub pull_batch: usize,
    /// How long a pull waits for the first message
    pub pull_timeout: Duration,
    /// How often the daemon reclaims stale pending messages
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub ytdlp_format: Option<String>,
    pub cookies_path: Option<PathBuf>,
    /// Prometheus listener port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::Once,
            work_dir: PathBuf::from("./download"),
            intermediate_dir: PathBuf::from("./intermediate"),
            output_dir: PathBuf::from("./output"),
            detection_config_path: PathBuf::from("config/detection_params.json"),
            detection_profile: DEFAULT_PROFILE.to_string(),
            aliases_path: PathBuf::from("config/character_aliases.json"),
            abort_policy: AbortPolicy::AllOrNothing,
            save_frames: true,
            enable_r2: false,
            enable_youtube: false,
            enable_firestore: true,
            pull_batch: 10,
            pull_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            ytdlp_format: None,
            cookies_path: None,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unparseable numbers fall back to defaults; an unknown worker mode or
    /// abort policy is an error.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let mode = match env_string("WORKER_MODE") {
            Some(s) => s.parse().map_err(WorkerError::config_error)?,
            None => defaults.mode,
        };
        let abort_policy = match env_string("ABORT_POLICY") {
            Some(s) => s.parse().map_err(WorkerError::config_error)?,
            None => defaults.abort_policy,
        };

        Ok(Self {
            mode,
            work_dir: env_path("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            intermediate_dir: env_path("INTERMEDIATE_DIR").unwrap_or(defaults.intermediate_dir),
            output_dir: env_path("OUTPUT_DIR").unwrap_or(defaults.output_dir),
            detection_config_path: env_path("DETECTION_CONFIG_PATH")
                .unwrap_or(defaults.detection_config_path),
            detection_profile: env_string("DETECTION_PROFILE").unwrap_or(defaults.detection_profile),
            aliases_path: env_path("CHARACTER_ALIASES_PATH").unwrap_or(defaults.aliases_path),
            abort_policy,
            save_frames: env_flag("SAVE_DETECTION_FRAMES").unwrap_or(defaults.save_frames),
            enable_r2: env_flag("ENABLE_R2").unwrap_or(defaults.enable_r2),
            enable_youtube: env_flag("ENABLE_YOUTUBE").unwrap_or(defaults.enable_youtube),
            enable_firestore: env_flag("ENABLE_FIRESTORE").unwrap_or(defaults.enable_firestore),
            pull_batch: std::env::var("WORKER_PULL_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.pull_batch),
            pull_timeout: Duration::from_secs(
                std::env::var("WORKER_PULL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            ytdlp_format: env_string("YTDLP_FORMAT"),
            cookies_path: env_path("YTDLP_COOKIES_PATH"),
            metrics_port: std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`; anything else is unset.
fn env_flag(key: &str) -> Option<bool> {
    match env_string(key)?.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
