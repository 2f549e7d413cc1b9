//! YouTube Data API access: chapter publishing and upload discovery.
//!
//! Chapters are written into the video description: a `0:00 本編開始` line,
//! one `{timestamp} {title}` line per chapter in start order, a blank line
//! and then the previous description with any earlier chapter block removed.
//! Access tokens come from an OAuth refresh token and are cached until
//! shortly before they expire.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chap_models::{format_timestamp, Chapter, NewVideoMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};

/// First line of every generated chapter block.
pub const INTRO_CHAPTER: &str = "0:00 本編開始";

/// Gaming.
pub const CATEGORY_ID: &str = "20";

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Page size of one `search.list` call.
pub const SEARCH_MAX_RESULTS: u32 = 10;

/// Refresh this long before the reported expiry.
const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(60);

// =============================================================================
// Description Building
// =============================================================================

/// Build the new description from `chapters` and the current description.
pub fn build_description(chapters: &[Chapter], original: &str) -> String {
    let mut sorted: Vec<&Chapter> = chapters.iter().collect();
    sorted.sort_by_key(|c| c.start_time);

    let mut lines = vec![INTRO_CHAPTER.to_string()];
    lines.extend(
        sorted
            .iter()
            .map(|c| format!("{} {}", format_timestamp(c.start_time), c.title)),
    );
    let chapter_text = lines.join("\n");

    let rest = strip_chapter_block(original);
    if rest.is_empty() {
        chapter_text
    } else {
        format!("{}\n\n{}", chapter_text, rest)
    }
}

/// Remove chapter blocks: a line starting with `0:00` and the timestamp
/// lines directly following it.
pub fn strip_chapter_block(description: &str) -> String {
    let mut kept = Vec::new();
    let mut in_block = false;

    for line in description.split('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("0:00") {
            in_block = true;
            continue;
        }
        if in_block && trimmed.contains(':') && trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        in_block = false;
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

// =============================================================================
// Publisher
// =============================================================================

/// Writes chapter markers for one video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChapterPublisher: Send + Sync {
    async fn publish_chapters(&self, video_id: &str, chapters: &[Chapter]) -> WorkerResult<()>;
}

/// OAuth client credentials and endpoints.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub api_base: String,
    pub token_url: String,
    pub timeout: Duration,
}

impl YouTubeConfig {
    /// `YOUTUBE_CLIENT_ID`, `YOUTUBE_CLIENT_SECRET` and
    /// `YOUTUBE_REFRESH_TOKEN` are required.
    pub fn from_env() -> WorkerResult<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| WorkerError::config_error(format!("{} must be set", key)))
        };

        Ok(Self {
            client_id: required("YOUTUBE_CLIENT_ID")?,
            client_secret: required("YOUTUBE_CLIENT_SECRET")?,
            refresh_token: required("YOUTUBE_REFRESH_TOKEN")?,
            api_base: std::env::var("YOUTUBE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            token_url: std::env::var("YOUTUBE_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            timeout: Duration::from_secs(
                std::env::var("YOUTUBE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct VideoUpdate<'a> {
    id: &'a str,
    snippet: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    kind: String,
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    published_at: String,
}

/// Snippet fields carried over on update; everything else is dropped by
/// the API when omitted.
const PRESERVED_SNIPPET_FIELDS: [&str; 3] = ["title", "tags", "defaultLanguage"];

/// YouTube Data API v3 client.
pub struct YouTubeClient {
    config: YouTubeConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl YouTubeClient {
    pub fn new(config: YouTubeConfig) -> WorkerResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(YouTubeConfig::from_env()?)
    }

    async fn access_token(&self) -> WorkerResult<String> {
        let mut cache = self.token.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() + TOKEN_REFRESH_BUFFER < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::youtube(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "Refreshed YouTube access token");
        *cache = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    async fn fetch_snippet(&self, token: &str, video_id: &str) -> WorkerResult<Map<String, Value>> {
        let url = format!("{}/videos", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("part", "snippet"), ("id", video_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::youtube(format!(
                "videos.list failed ({}): {}",
                status, body
            )));
        }

        let list: VideoListResponse = response.json().await?;
        list.items
            .into_iter()
            .next()
            .map(|item| item.snippet)
            .ok_or_else(|| WorkerError::youtube(format!("Video not found: {}", video_id)))
    }

    /// Videos uploaded to `channel_id` after `published_after`, newest
    /// first, at most [`SEARCH_MAX_RESULTS`].
    pub async fn recent_uploads(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
    ) -> WorkerResult<Vec<NewVideoMessage>> {
        let token = self.access_token().await?;
        let url = format!("{}/search", self.config.api_base.trim_end_matches('/'));
        let after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = SEARCH_MAX_RESULTS.to_string();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("part", "id,snippet"),
                ("channelId", channel_id),
                ("publishedAfter", after.as_str()),
                ("type", "video"),
                ("order", "date"),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::youtube(format!(
                "search.list failed ({}): {}",
                status, body
            )));
        }

        let list: SearchListResponse = response.json().await?;
        let videos: Vec<NewVideoMessage> = list
            .items
            .into_iter()
            .filter(|item| item.id.kind == "youtube#video")
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                Some(NewVideoMessage {
                    video_id,
                    title: item.snippet.title,
                    channel_id: channel_id.to_string(),
                    channel_title: item.snippet.channel_title,
                    published_at: item.snippet.published_at,
                })
            })
            .collect();
        debug!(channel_id, found = videos.len(), "Listed recent uploads");
        Ok(videos)
    }
}

#[async_trait]
impl ChapterPublisher for YouTubeClient {
    async fn publish_chapters(&self, video_id: &str, chapters: &[Chapter]) -> WorkerResult<()> {
        let token = self.access_token().await?;
        let current = self.fetch_snippet(&token, video_id).await?;

        let original = current
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut snippet = Map::new();
        for field in PRESERVED_SNIPPET_FIELDS {
            if let Some(value) = current.get(field) {
                snippet.insert(field.to_string(), value.clone());
            }
        }
        snippet.insert(
            "description".to_string(),
            Value::String(build_description(chapters, original)),
        );
        snippet.insert("categoryId".to_string(), Value::String(CATEGORY_ID.to_string()));

        let url = format!("{}/videos", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .put(&url)
            .bearer_auth(&token)
            .query(&[("part", "snippet")])
            .json(&VideoUpdate {
                id: video_id,
                snippet,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::youtube(format!(
                "videos.update failed ({}): {}",
                status, body
            )));
        }

        info!(video_id, chapters = chapters.len(), "Updated video description");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(start: u64, title: &str) -> Chapter {
        Chapter {
            start_time: start,
            title: title.to_string(),
            match_id: None,
        }
    }

    #[test]
    fn test_build_description_sorts_and_formats() {
        let chapters = vec![
            chapter(3725, "第02戦 Ken VS Ryu"),
            chapter(47, "第01戦 Ryu VS Ken"),
        ];
        let description = build_description(&chapters, "");
        assert_eq!(
            description,
            "0:00 本編開始\n0:47 第01戦 Ryu VS Ken\n1:02:05 第02戦 Ken VS Ryu"
        );
    }

    #[test]
    fn test_build_description_keeps_original_text() {
        let description = build_description(&[chapter(60, "第01戦 A VS B")], "Ranked matches\n#SF6");
        assert_eq!(
            description,
            "0:00 本編開始\n1:00 第01戦 A VS B\n\nRanked matches\n#SF6"
        );
    }

    #[test]
    fn test_old_chapter_block_is_replaced() {
        let original = "0:00 本編開始\n0:47 第01戦 Ryu VS Ken\n2:10 第02戦 Ryu VS Ken\nFollow me!\n12:00 is not a chapter here";
        assert_eq!(
            strip_chapter_block(original),
            "Follow me!\n12:00 is not a chapter here"
        );

        let rebuilt = build_description(&[chapter(50, "第01戦 Ryu VS Ken")], original);
        assert_eq!(rebuilt.matches(INTRO_CHAPTER).count(), 1);
        assert!(!rebuilt.contains("2:10"));
    }

    #[test]
    fn test_text_before_block_survives() {
        let original = "Intro text\n\n0:00 Start\n1:00 Part\n\nOutro";
        assert_eq!(strip_chapter_block(original), "Intro text\n\n\nOutro");
    }
}
