//! Publishing of per-video results.
//!
//! [`ObjectStoreSink`] writes one JSON object per video and per match and
//! replaces the video's rows in the two tables. [`LocalOutputSink`] is the
//! offline fallback that only writes two JSON files per video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chap_models::{MatchRecord, VideoRecord};
use serde::Serialize;
use tracing::info;

use crate::error::StorageResult;
use crate::object_store::ObjectStore;
use crate::table::{to_row, TableSink, TableUpdate, MATCHES_TABLE, VIDEOS_TABLE};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Key of the per-video JSON object.
pub fn video_key(video_id: &str) -> String {
    format!("videos/{}.json", video_id)
}

/// Key of the per-match JSON object.
pub fn match_key(match_id: &str) -> String {
    format!("matches/{}.json", match_id)
}

/// Pretty-printed JSON bytes.
pub fn json_bytes<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// What a sink wrote for one video.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Object keys or file paths written
    pub written: Vec<String>,
    pub videos_table: Option<TableUpdate>,
    pub matches_table: Option<TableUpdate>,
}

/// Destination for a processed video's records.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(
        &self,
        video: &VideoRecord,
        matches: &[MatchRecord],
    ) -> StorageResult<PublishSummary>;

    fn describe(&self) -> String;
}

/// Per-record objects plus table updates in an [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    tables: TableSink,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            tables: TableSink::new(store.clone()),
            store,
        }
    }

    pub async fn upload_json<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        self.store.put(key, json_bytes(value)?, CONTENT_TYPE_JSON).await?;
        info!(key, "Uploaded JSON");
        Ok(())
    }
}

#[async_trait]
impl ResultSink for ObjectStoreSink {
    async fn publish(
        &self,
        video: &VideoRecord,
        matches: &[MatchRecord],
    ) -> StorageResult<PublishSummary> {
        let mut summary = PublishSummary::default();

        let key = video_key(&video.video_id);
        self.upload_json(&key, video).await?;
        summary.written.push(key);

        for record in matches {
            let key = match_key(&record.id);
            self.upload_json(&key, record).await?;
            summary.written.push(key);
        }

        summary.videos_table = Some(
            self.tables
                .replace_rows(VIDEOS_TABLE, "videoId", &video.video_id, vec![to_row(video)?])
                .await?,
        );

        let rows = matches.iter().map(to_row).collect::<StorageResult<Vec<_>>>()?;
        summary.matches_table = Some(
            self.tables
                .replace_rows(MATCHES_TABLE, "videoId", &video.video_id, rows)
                .await?,
        );

        Ok(summary)
    }

    fn describe(&self) -> String {
        self.store.describe()
    }
}

/// `{dir}/{video_id}_video.json` and `{dir}/{video_id}_matches.json`.
#[derive(Debug, Clone)]
pub struct LocalOutputSink {
    dir: PathBuf,
}

impl LocalOutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: String, value: &T) -> StorageResult<String> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, json_bytes(value)?).await?;
        info!(path = %path.display(), "Saved JSON");
        Ok(path.display().to_string())
    }
}

#[async_trait]
impl ResultSink for LocalOutputSink {
    async fn publish(
        &self,
        video: &VideoRecord,
        matches: &[MatchRecord],
    ) -> StorageResult<PublishSummary> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let id = &video.video_id;
        Ok(PublishSummary {
            written: vec![
                self.write_json(format!("{}_video.json", id), video).await?,
                self.write_json(format!("{}_matches.json", id), matches).await?,
            ],
            ..Default::default()
        })
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}
