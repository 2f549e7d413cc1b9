//! Frame source backed by an `ffmpeg` rawvideo pipe.
//!
//! ffmpeg decodes the first video stream to packed RGB24 on stdout. Frames
//! are read in order; a small history of recently decoded frames makes the
//! short backward seeks done by lookahead and frame selection free. Larger
//! jumps restart ffmpeg with an input-side `-ss`.

use image::RgbImage;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use super::FrameSource;
use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;

/// Frames kept for backward seeks.
pub const DEFAULT_HISTORY: usize = 16;

/// Forward gaps up to this many frames are decoded through instead of
/// restarting ffmpeg.
const FORWARD_DECODE_LIMIT: u64 = 120;

/// Tail of ffmpeg's stderr kept in error messages.
const STDERR_TAIL: usize = 2048;

struct Decoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: File,
}

impl Decoder {
    fn stderr_tail(&mut self) -> Option<String> {
        let mut text = String::new();
        self.stderr.seek(SeekFrom::Start(0)).ok()?;
        self.stderr.read_to_string(&mut text).ok()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let start = text
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| text.len() - i <= STDERR_TAIL)
            .unwrap_or(0);
        Some(text[start..].to_string())
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes a video file through ffmpeg.
pub struct FfmpegFrameSource {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: Option<u64>,
    position: u64,
    decoder: Option<Decoder>,
    /// Index of the next frame the running decoder yields
    decoder_position: u64,
    history: VecDeque<(u64, RgbImage)>,
    history_capacity: usize,
}

impl FfmpegFrameSource {
    /// Open `path` using stream properties from [`crate::probe::probe_video`].
    ///
    /// ffmpeg is started lazily on the first read.
    pub fn open(path: impl AsRef<Path>, info: &VideoInfo) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        if info.width == 0 || info.height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "{} has no frame size",
                path.display()
            )));
        }
        if !(info.fps.is_finite() && info.fps > 0.0) {
            return Err(MediaError::InvalidVideo(format!(
                "{} has invalid frame rate {}",
                path.display(),
                info.fps
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: info.frame_count,
            position: 0,
            decoder: None,
            decoder_position: 0,
            history: VecDeque::with_capacity(DEFAULT_HISTORY),
            history_capacity: DEFAULT_HISTORY,
        })
    }

    /// Keep `capacity` decoded frames for backward seeks.
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn spawn_decoder(&mut self, start: u64) -> MediaResult<()> {
        self.decoder = None;

        let stderr = tempfile::tempfile()?;
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if start > 0 {
            cmd.args(["-ss", &format!("{:.6}", start as f64 / self.fps)]);
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args([
                "-map",
                "0:v:0",
                "-vsync",
                "0",
                "-s",
                &format!("{}x{}", self.width, self.height),
                "-pix_fmt",
                "rgb24",
                "-f",
                "rawvideo",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr.try_clone()?));

        debug!(
            path = %self.path.display(),
            start_frame = start,
            "Starting ffmpeg frame decoder"
        );

        let mut child = cmd.spawn().map_err(|e| {
            MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;

        self.decoder = Some(Decoder {
            child,
            stdout: BufReader::with_capacity(self.frame_bytes(), stdout),
            stderr,
        });
        self.decoder_position = start;
        Ok(())
    }

    /// Pull the next frame out of the running decoder.
    fn decode_one(&mut self) -> MediaResult<Option<RgbImage>> {
        let index = self.decoder_position;
        let bytes = self.frame_bytes();
        let (width, height) = (self.width, self.height);
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => return Err(MediaError::internal("decoder not running")),
        };

        let mut buf = vec![0u8; bytes];
        let filled = read_full(&mut decoder.stdout, &mut buf)
            .map_err(|e| MediaError::decode(index, format!("reading ffmpeg output: {}", e)))?;

        if filled == 0 {
            let status = decoder.child.wait()?;
            if !status.success() {
                let stderr = decoder.stderr_tail();
                return Err(MediaError::Decode {
                    frame_index: index,
                    message: format!(
                        "ffmpeg exited with {:?}: {}",
                        status.code(),
                        stderr.unwrap_or_default()
                    ),
                });
            }
            return Ok(None);
        }
        if filled < bytes {
            return Err(MediaError::decode(
                index,
                format!("truncated frame ({} of {} bytes)", filled, bytes),
            ));
        }

        let frame = RgbImage::from_raw(width, height, buf)
            .ok_or_else(|| MediaError::decode(index, "frame buffer size mismatch"))?;

        self.decoder_position += 1;
        self.history.push_back((index, frame.clone()));
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
        Ok(Some(frame))
    }

    fn from_history(&self, index: u64) -> Option<RgbImage> {
        self.history
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, frame)| frame.clone())
    }
}

impl FrameSource for FfmpegFrameSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame_index: u64) -> MediaResult<()> {
        // Decoding is lazy; the read that follows decides how to get there.
        self.position = frame_index;
        Ok(())
    }

    fn read_next(&mut self) -> MediaResult<Option<RgbImage>> {
        let target = self.position;

        if let Some(frame) = self.from_history(target) {
            self.position += 1;
            return Ok(Some(frame));
        }

        let needs_restart = self.decoder.is_none()
            || target < self.decoder_position
            || target - self.decoder_position > FORWARD_DECODE_LIMIT;
        if needs_restart {
            if self.decoder.is_some() {
                debug!(
                    from = self.decoder_position,
                    to = target,
                    "Restarting ffmpeg decoder for seek"
                );
            }
            self.history.clear();
            self.spawn_decoder(target)?;
        }

        while self.decoder_position < target {
            if self.decode_one()?.is_none() {
                return Ok(None);
            }
        }

        let frame = self.decode_one()?;
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if self.decoder.is_some() {
            debug!(path = %self.path.display(), "Closing ffmpeg frame decoder");
        }
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Frame pipe read failed after {} bytes: {}", filled, e);
                return Err(e);
            }
        }
    }
    Ok(filled)
}
