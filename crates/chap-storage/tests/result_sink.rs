//! Publishing results to a local object store and to the offline output dir.

use std::sync::Arc;

use chap_models::{Chapter, DetectionStats, MatchRecord, PlayerLabels, VideoRecord};
use chap_storage::{
    LocalDirStore, LocalOutputSink, ObjectStore, ObjectStoreSink, ResultSink, TableSink,
    MATCHES_TABLE, VIDEOS_TABLE,
};

fn matches_for(video_id: &str, starts: &[f64]) -> Vec<MatchRecord> {
    let labels = PlayerLabels::new("Ryu", "Ken");
    starts
        .iter()
        .enumerate()
        .map(|(i, &t)| MatchRecord::new(video_id, t, (t * 30.0) as u64 + i as u64, 0.8, &labels, &labels))
        .collect()
}

fn video_for(video_id: &str, matches: &[MatchRecord]) -> VideoRecord {
    VideoRecord {
        video_id: video_id.to_string(),
        title: "Ranked".to_string(),
        channel_id: "UC1".to_string(),
        channel_title: "Channel".to_string(),
        published_at: "2024-05-01T00:00:00Z".to_string(),
        processed_at: chrono::Utc::now(),
        chapters: matches
            .iter()
            .enumerate()
            .map(|(i, m)| Chapter::for_match(i + 1, m))
            .collect(),
        detection_stats: DetectionStats {
            total_frames: 1000,
            matched_frames: matches.len() as u64,
        },
    }
}

#[tokio::test]
async fn test_publish_writes_records_and_tables() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirStore::new(dir.path()));
    let sink = ObjectStoreSink::new(store.clone());

    let matches = matches_for("vid1", &[12.4, 300.9]);
    let summary = sink.publish(&video_for("vid1", &matches), &matches).await.unwrap();

    assert!(summary.written.contains(&"videos/vid1.json".to_string()));
    assert!(summary.written.contains(&"matches/vid1_12.json".to_string()));
    assert!(summary.written.contains(&"matches/vid1_300.json".to_string()));

    let video_json = store.get("videos/vid1.json").await.unwrap().unwrap();
    let video: serde_json::Value = serde_json::from_slice(&video_json).unwrap();
    assert_eq!(video["chapters"][0]["title"], "第01戦 Ryu VS Ken");
    assert_eq!(video["detectionStats"]["matchedFrames"], 2);

    let tables = TableSink::new(store.clone());
    assert_eq!(tables.read_rows(VIDEOS_TABLE).await.unwrap().len(), 1);
    assert_eq!(tables.read_rows(MATCHES_TABLE).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_republishing_replaces_rows_for_that_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirStore::new(dir.path()));
    let sink = ObjectStoreSink::new(store.clone());

    let other = matches_for("other", &[5.0]);
    sink.publish(&video_for("other", &other), &other).await.unwrap();

    let first = matches_for("vid1", &[10.0, 20.0, 30.0]);
    sink.publish(&video_for("vid1", &first), &first).await.unwrap();

    let second = matches_for("vid1", &[11.0, 21.0]);
    let summary = sink.publish(&video_for("vid1", &second), &second).await.unwrap();

    let matches_update = summary.matches_table.unwrap();
    assert_eq!(matches_update.removed, 3);
    assert_eq!(matches_update.added, 2);
    assert_eq!(matches_update.total, 3);
    assert_eq!(summary.videos_table.unwrap().total, 2);

    let rows = TableSink::new(store).read_rows(MATCHES_TABLE).await.unwrap();
    let mut ids: Vec<String> = rows
        .iter()
        .filter_map(|r| r["id"].as_str().map(String::from))
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["other_5", "vid1_11", "vid1_21"]);
}

#[tokio::test]
async fn test_local_output_sink_writes_two_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let sink = LocalOutputSink::new(&out);

    let matches = matches_for("vid1", &[62.0]);
    let summary = sink.publish(&video_for("vid1", &matches), &matches).await.unwrap();
    assert_eq!(summary.written.len(), 2);
    assert!(summary.matches_table.is_none());

    let saved: Vec<MatchRecord> =
        serde_json::from_slice(&std::fs::read(out.join("vid1_matches.json")).unwrap()).unwrap();
    assert_eq!(saved, matches);
    assert!(out.join("vid1_video.json").is_file());
}

#[tokio::test]
#[ignore = "requires R2 credentials"]
async fn test_r2_connectivity() {
    let client = chap_storage::R2Client::from_env()
        .await
        .expect("Failed to create R2 client");
    client.check_bucket().await.expect("R2 not reachable");
}
