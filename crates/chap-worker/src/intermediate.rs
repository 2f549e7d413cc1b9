//! Per-video intermediate files.
//!
//! Layout under the intermediate root:
//!
//! ```text
//! {video_id}/detection_summary.json
//! {video_id}/frame_{NNN}_{seconds}s.png
//! {video_id}/matches.json
//! {video_id}/video_data.json
//! {video_id}/chapters.json
//! ```
//!
//! The summary, the frames and `matches.json` are enough to run a video
//! again from recognition or from chapter publishing.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chap_media::{Detection, OffsetChoice};
use chap_models::{Chapter, DetectionSummary, MatchRecord, VideoRecord};
use image::{ImageOutputFormat, RgbImage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::WorkerResult;

const SUMMARY_FILE: &str = "detection_summary.json";
const MATCHES_FILE: &str = "matches.json";

#[derive(Debug, Clone)]
pub struct IntermediateStore {
    root: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChaptersFile<'a> {
    video_id: &'a str,
    chapters: &'a [Chapter],
}

/// Summary of `detections` in scan order.
pub fn summarize(video_id: &str, detections: &[Detection]) -> DetectionSummary {
    DetectionSummary::new(
        video_id,
        detections
            .iter()
            .map(|d| (d.timestamp, d.frame_index, d.confidence)),
    )
}

impl IntermediateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, video_id: &str) -> PathBuf {
        self.root.join(video_id)
    }

    /// `frame_{index:03}_{whole seconds}s.png`, index 1-based.
    pub fn frame_file_name(index: usize, timestamp: f64) -> String {
        format!("frame_{:03}_{}s.png", index, timestamp.max(0.0).floor() as u64)
    }

    pub fn frame_path(&self, video_id: &str, index: usize, timestamp: f64) -> PathBuf {
        self.dir_for(video_id)
            .join(Self::frame_file_name(index, timestamp))
    }

    pub async fn save_detection_summary(&self, summary: &DetectionSummary) -> WorkerResult<PathBuf> {
        let path = self
            .write_json(&summary.video_id, SUMMARY_FILE, summary)
            .await?;
        info!(video_id = %summary.video_id, path = %path.display(), "Saved detection summary");
        Ok(path)
    }

    /// Save the recognition frame of the `index`-th detection as PNG.
    pub async fn save_frame(
        &self,
        video_id: &str,
        index: usize,
        detection: &Detection,
    ) -> WorkerResult<PathBuf> {
        let path = self.frame_path(video_id, index, detection.timestamp);
        let frame = detection.frame.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&frame))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        tokio::fs::create_dir_all(self.dir_for(video_id)).await?;
        tokio::fs::write(&path, png).await?;
        Ok(path)
    }

    pub async fn save_matches(&self, video_id: &str, matches: &[MatchRecord]) -> WorkerResult<PathBuf> {
        self.write_json(video_id, MATCHES_FILE, matches).await
    }

    pub async fn save_final_results(&self, video: &VideoRecord) -> WorkerResult<()> {
        let id = &video.video_id;
        self.write_json(id, "video_data.json", video).await?;
        self.write_json(
            id,
            "chapters.json",
            &ChaptersFile {
                video_id: id,
                chapters: &video.chapters,
            },
        )
        .await?;
        info!(video_id = %id, dir = %self.dir_for(id).display(), "Saved final results");
        Ok(())
    }

    /// `None` when no summary was saved for the video.
    pub async fn load_detection_summary(&self, video_id: &str) -> WorkerResult<Option<DetectionSummary>> {
        self.read_json(video_id, SUMMARY_FILE).await
    }

    /// `None` when recognition never finished for the video.
    pub async fn load_matches(&self, video_id: &str) -> WorkerResult<Option<Vec<MatchRecord>>> {
        self.read_json(video_id, MATCHES_FILE).await
    }

    /// Rebuild detections from a summary and its saved frames.
    ///
    /// Entries whose frame is missing or unreadable are skipped with a
    /// warning. The recognition offset is not recorded, so every loaded
    /// detection reports the accepted frame as its recognition frame.
    pub async fn load_detections(&self, summary: &DetectionSummary) -> Vec<(usize, Detection)> {
        let mut detections = Vec::with_capacity(summary.detections.len());

        for entry in &summary.detections {
            let path = self.frame_path(&summary.video_id, entry.index, entry.timestamp);
            let frame = match read_png(&path).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        video_id = %summary.video_id,
                        path = %path.display(),
                        error = %e,
                        "Saved frame unavailable, skipping detection"
                    );
                    continue;
                }
            };
            detections.push((
                entry.index,
                Detection {
                    timestamp: entry.timestamp,
                    frame_index: entry.frame_number,
                    confidence: entry.confidence,
                    frame,
                    recognition_frame_index: entry.frame_number,
                    recognition_choice: OffsetChoice::Default,
                },
            ));
        }

        detections
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        video_id: &str,
        name: &str,
        value: &T,
    ) -> WorkerResult<PathBuf> {
        let dir = self.dir_for(video_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(value)?).await?;
        Ok(path)
    }

    async fn read_json<T: DeserializeOwned>(&self, video_id: &str, name: &str) -> WorkerResult<Option<T>> {
        let path = self.dir_for(video_id).join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode_png(frame: &RgbImage) -> WorkerResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    frame.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

async fn read_png(path: &Path) -> WorkerResult<RgbImage> {
    let bytes = tokio::fs::read(path).await?;
    let frame = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    Ok(frame.to_rgb8())
}
