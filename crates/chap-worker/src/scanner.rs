//! Running the scene matcher over a video file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chap_media::{
    probe_video, FfmpegFrameSource, FrameSource, MediaError, MediaResult, ScanOutcome, ScanWindow,
    SceneMatcher,
};
use tracing::info;

/// Scans a local video for round-start scenes.
///
/// Errors keep their [`MediaError`] shape so partial detections of an
/// aborted scan reach the caller.
#[async_trait]
pub trait SceneScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> MediaResult<ScanOutcome>;
}

/// Decodes with ffmpeg and scans on a blocking thread.
#[derive(Debug, Clone)]
pub struct FfmpegSceneScanner {
    matcher: Arc<SceneMatcher>,
}

impl FfmpegSceneScanner {
    pub fn new(matcher: SceneMatcher) -> Self {
        Self {
            matcher: Arc::new(matcher),
        }
    }

    pub fn matcher(&self) -> &SceneMatcher {
        &self.matcher
    }
}

#[async_trait]
impl SceneScanner for FfmpegSceneScanner {
    async fn scan(&self, path: &Path) -> MediaResult<ScanOutcome> {
        let info = probe_video(path).await?;
        info!(
            path = %path.display(),
            duration = info.duration,
            fps = info.fps,
            width = info.width,
            height = info.height,
            "Probed video"
        );

        let mut source = FfmpegFrameSource::open(path, &info)?;
        let matcher = Arc::clone(&self.matcher);
        tokio::task::spawn_blocking(move || matcher.scan(&mut source, ScanWindow::full()))
            .await
            .map_err(|e| MediaError::internal(format!("scan task failed: {}", e)))?
    }
}

/// Scans any in-process [`FrameSource`] built per call, for replays and tests.
pub struct SourceSceneScanner<F> {
    matcher: Arc<SceneMatcher>,
    open: F,
}

impl<F, S> SourceSceneScanner<F>
where
    F: Fn(&Path) -> MediaResult<S> + Send + Sync,
    S: FrameSource + 'static,
{
    pub fn new(matcher: SceneMatcher, open: F) -> Self {
        Self {
            matcher: Arc::new(matcher),
            open,
        }
    }
}

#[async_trait]
impl<F, S> SceneScanner for SourceSceneScanner<F>
where
    F: Fn(&Path) -> MediaResult<S> + Send + Sync,
    S: FrameSource + 'static,
{
    async fn scan(&self, path: &Path) -> MediaResult<ScanOutcome> {
        let mut source = (self.open)(path)?;
        let matcher = Arc::clone(&self.matcher);
        tokio::task::spawn_blocking(move || matcher.scan(&mut source, ScanWindow::full()))
            .await
            .map_err(|e| MediaError::internal(format!("scan task failed: {}", e)))?
    }
}
