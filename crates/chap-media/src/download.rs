//! Video acquisition using yt-dlp.
//!
//! Downloads land in a work directory as `{video_id}.{ext}`. A file already
//! present for the id is reused, so re-running an item after a crash does
//! not download again.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Container extensions probed when looking for an existing download.
const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mkv"];

/// Default format selection: best MP4 video+audio, falling back to anything.
pub const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Options passed to yt-dlp.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// `-f` format selector; [`DEFAULT_FORMAT`] when `None`
    pub format: Option<String>,
    /// Netscape cookies file
    pub cookies_path: Option<PathBuf>,
}

/// Metadata reported by yt-dlp without downloading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteVideoInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default, alias = "channel")]
    pub uploader: Option<String>,
}

/// Validate that a cookies file appears to be in Netscape format.
///
/// Netscape cookies files either start with "# Netscape HTTP Cookie File"
/// or contain tab-separated lines with domain entries.
pub fn is_valid_netscape_cookies(content: &str) -> bool {
    if content.starts_with("# Netscape HTTP Cookie File")
        || content.starts_with("# HTTP Cookie File")
    {
        return true;
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split('\t').count() >= 6)
}

/// Existing download for `video_id` in `dir`, if any.
pub fn find_existing(dir: impl AsRef<Path>, video_id: &str) -> Option<PathBuf> {
    let dir = dir.as_ref();
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", video_id, ext)))
        .find(|p| p.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false))
}

async fn usable_cookies(options: &DownloadOptions) -> Option<String> {
    let path = options.cookies_path.as_ref()?;
    match tokio::fs::read_to_string(path).await {
        Ok(content) if is_valid_netscape_cookies(&content) => {
            Some(path.to_string_lossy().to_string())
        }
        Ok(_) => {
            warn!(
                path = %path.display(),
                "Cookies file is not in Netscape format, skipping"
            );
            None
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to read cookies file: {}", e);
            None
        }
    }
}

/// Download a YouTube video into `dir`, reusing an existing file.
///
/// Returns the path of the video file.
pub async fn download_video(
    video_id: &str,
    dir: impl AsRef<Path>,
    options: &DownloadOptions,
) -> MediaResult<PathBuf> {
    let dir = dir.as_ref();

    if let Some(existing) = find_existing(dir, video_id) {
        info!(
            video_id,
            path = %existing.display(),
            "Using existing video file"
        );
        return Ok(existing);
    }

    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;
    tokio::fs::create_dir_all(dir).await?;

    let url = format!("https://www.youtube.com/watch?v={}", video_id);
    let template = dir.join(format!("{}.%(ext)s", video_id));
    let format = options.format.as_deref().unwrap_or(DEFAULT_FORMAT);

    let mut cmd = Command::new("yt-dlp");
    cmd.args(["--no-progress", "--no-playlist", "-f", format, "-o"])
        .arg(&template);
    if let Some(cookies) = usable_cookies(options).await {
        cmd.args(["--cookies", &cookies]);
    }
    cmd.arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!(video_id, dir = %dir.display(), "Downloading video");
    let output = cmd.output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {}", stderr);

        let error_msg = stderr.lines().last().unwrap_or("Unknown error");
        if stderr.contains("429") || stderr.contains("Too Many Requests") {
            warn!(video_id, "YouTube rate limit detected");
        }
        return Err(MediaError::download_failed(format!(
            "yt-dlp failed: {}",
            error_msg
        )));
    }

    let path = find_existing(dir, video_id)
        .ok_or_else(|| MediaError::download_failed("Output file not created"))?;

    let file_size = path.metadata()?.len();
    info!(
        video_id,
        output = %path.display(),
        size_mb = file_size as f64 / (1024.0 * 1024.0),
        "Downloaded video successfully"
    );
    Ok(path)
}

/// Fetch video metadata without downloading (`yt-dlp -J`).
pub async fn fetch_video_info(video_id: &str, options: &DownloadOptions) -> MediaResult<RemoteVideoInfo> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;

    let url = format!("https://www.youtube.com/watch?v={}", video_id);
    let mut cmd = Command::new("yt-dlp");
    cmd.args(["-J", "--skip-download", "--no-warnings"]);
    if let Some(cookies) = usable_cookies(options).await {
        cmd.args(["--cookies", &cookies]);
    }
    let output = cmd
        .arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::download_failed(format!(
            "Failed to get video info for {}: {}",
            video_id,
            stderr.lines().last().unwrap_or("Unknown error")
        )));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netscape_cookie_detection() {
        assert!(is_valid_netscape_cookies("# Netscape HTTP Cookie File\n"));
        assert!(is_valid_netscape_cookies(
            "# comment\n.youtube.com\tTRUE\t/\tTRUE\t0\tPREF\tf1=1\n"
        ));
        assert!(!is_valid_netscape_cookies("{\"cookies\": []}"));
        assert!(!is_valid_netscape_cookies(""));
    }

    #[test]
    fn test_find_existing_download() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_existing(dir.path(), "abc").is_none());

        // Empty files are partial downloads.
        std::fs::write(dir.path().join("abc.mp4"), b"").unwrap();
        assert!(find_existing(dir.path(), "abc").is_none());

        std::fs::write(dir.path().join("abc.webm"), b"data").unwrap();
        assert_eq!(
            find_existing(dir.path(), "abc").unwrap(),
            dir.path().join("abc.webm")
        );
    }

    #[tokio::test]
    async fn test_download_reuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vid123.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        let result = download_video("vid123", dir.path(), &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(result, path);
    }

    #[test]
    fn test_remote_info_parses_yt_dlp_json() {
        let json = r#"{"id":"abc","title":"Ranked","duration":3600.5,"upload_date":"20240501","channel_id":"UC1","uploader":"Someone","formats":[]}"#;
        let info: RemoteVideoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.title.as_deref(), Some("Ranked"));
        assert_eq!(info.uploader.as_deref(), Some("Someone"));
    }
}
