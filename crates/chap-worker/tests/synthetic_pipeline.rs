//! The whole pipeline on a synthetic clip: in-memory frames, a stub
//! recognizer and local storage, driven through the in-memory queue.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chap_firestore::ProcessingLedger;
use chap_media::{
    DetectionParameters, MediaResult, MemoryFrameSource, ReferencePattern, Region, SceneMatcher,
};
use chap_models::{Chapter, NewVideoMessage, PlayerLabels, ProcessingStatus, VideoId, VideoRecord};
use chap_queue::{MemoryQueue, MessageQueue};
use chap_recognition::{Recognition, RecognitionResult, Recognizer};
use chap_storage::{LocalDirStore, ObjectStore, ObjectStoreSink, TableSink, MATCHES_TABLE, VIDEOS_TABLE};
use chap_worker::{
    ChapterPublisher, Executor, IntermediateStore, Pipeline, SourceSceneScanner, VideoFetcher,
    WorkerConfig, WorkerResult,
};
use image::{imageops, Rgb, RgbImage};

const FPS: f64 = 10.0;
const CLIP_FRAMES: u64 = 600;

fn glyph() -> RgbImage {
    let mut img = RgbImage::new(60, 24);
    for (x, y, p) in img.enumerate_pixels_mut() {
        let square = (4..20).contains(&x) && (4..20).contains(&y);
        let bar = (30..56).contains(&x) && (8..16).contains(&y);
        if square || bar {
            *p = Rgb([255, 255, 255]);
        }
    }
    img
}

/// Caption shown for one second starting at each of `starts` (seconds).
fn clip(starts: Vec<u64>) -> MemoryFrameSource {
    let caption = glyph();
    MemoryFrameSource::from_fn(CLIP_FRAMES, FPS, move |index| {
        let mut frame = RgbImage::new(200, 100);
        let shown = starts
            .iter()
            .any(|s| (s * 10..s * 10 + 10).contains(&index));
        if shown {
            imageops::replace(&mut frame, &caption, 20, 20);
        }
        frame
    })
}

fn matcher() -> SceneMatcher {
    let params = DetectionParameters {
        profile: "synthetic".to_string(),
        template_path: PathBuf::from("positive.png"),
        reject_templates: vec![],
        threshold: 0.6,
        reject_threshold: 0.6,
        min_interval_sec: 2.0,
        frame_interval: 1,
        post_check_frames: 10,
        post_check_reject_limit: 2,
        search_region: Region::new(10, 10, 190, 90).unwrap(),
        crop_region: Region::new(0, 92, 200, 100).unwrap(),
        recognize_frame_offset: 6,
        recognize_frame_offset_alt: 4,
        recognize_frame_offset_threshold: 5.0,
    };
    SceneMatcher::new(params, ReferencePattern::from_image("positive", &glyph()), vec![]).unwrap()
}

struct LocalFetcher;

#[async_trait]
impl VideoFetcher for LocalFetcher {
    async fn fetch(&self, video_id: &VideoId) -> WorkerResult<PathBuf> {
        Ok(PathBuf::from(format!("{}.mp4", video_id)))
    }
}

struct FixedRecognizer;

#[async_trait]
impl Recognizer for FixedRecognizer {
    async fn recognize(&self, _frame: &RgbImage) -> RecognitionResult<Recognition> {
        Ok(Recognition {
            labels: PlayerLabels::new("Ryu", "Ken"),
            raw: PlayerLabels::new("リュウ", "ケン"),
        })
    }
}

#[derive(Default)]
struct RecordingPublisher {
    calls: Mutex<Vec<(String, Vec<Chapter>)>>,
}

#[async_trait]
impl ChapterPublisher for RecordingPublisher {
    async fn publish_chapters(&self, video_id: &str, chapters: &[Chapter]) -> WorkerResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((video_id.to_string(), chapters.to_vec()));
        Ok(())
    }
}

/// Video ids `clipA`/`clipB` select captions at 10 s / 10 s and 30 s.
fn open_clip(path: &Path) -> MediaResult<MemoryFrameSource> {
    let starts = match path.file_stem().and_then(|s| s.to_str()) {
        Some("clipB") => vec![10, 30],
        _ => vec![10],
    };
    Ok(clip(starts))
}

#[tokio::test]
async fn test_queue_to_tables() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirStore::new(dir.path().join("bucket")));
    let publisher = Arc::new(RecordingPublisher::default());
    let ledger = ProcessingLedger::in_memory();

    let pipeline = Pipeline::new(
        ledger.clone(),
        Arc::new(LocalFetcher),
        Arc::new(SourceSceneScanner::new(matcher(), open_clip)),
        Arc::new(FixedRecognizer),
        Arc::new(ObjectStoreSink::new(store.clone())),
        IntermediateStore::new(dir.path().join("intermediate")),
    )
    .with_chapter_publisher(publisher.clone());

    let queue = Arc::new(MemoryQueue::default());
    for id in ["clipA", "clipB"] {
        queue.publish(&NewVideoMessage::new(id)).await.unwrap();
    }

    let config = WorkerConfig {
        pull_timeout: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    let executor = Executor::new(config, queue.clone(), Arc::new(pipeline));
    let summary = executor.run_once().await.unwrap();
    assert_eq!(summary.completed, 2);

    for (id, count) in [("clipA", 1), ("clipB", 2)] {
        let record = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(record.match_count, Some(count));
    }

    let calls = publisher.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    let (_, b_chapters) = calls.iter().find(|(id, _)| id == "clipB").unwrap();
    assert_eq!(b_chapters[0].start_time, 10);
    assert_eq!(b_chapters[0].title, "第01戦 Ryu VS Ken");
    assert_eq!(b_chapters[1].start_time, 30);
    assert_eq!(b_chapters[1].title, "第02戦 Ryu VS Ken");

    let video: VideoRecord =
        serde_json::from_slice(&store.get("videos/clipA.json").await.unwrap().unwrap()).unwrap();
    assert_eq!(video.chapters.len(), 1);
    assert_eq!(video.detection_stats.total_frames, CLIP_FRAMES);

    let tables = TableSink::new(store.clone());
    assert_eq!(tables.read_rows(VIDEOS_TABLE).await.unwrap().len(), 2);
    assert_eq!(tables.read_rows(MATCHES_TABLE).await.unwrap().len(), 3);

    let frame = dir.path().join("intermediate/clipB/frame_002_30s.png");
    assert!(frame.is_file());
}
