//! Round-start scene scanner.
//!
//! Single forward pass over a frame window. Every `frame_interval`-th frame
//! is cropped to the search region, turned into an edge map and correlated
//! against the positive pattern. A candidate (best score at or above
//! `threshold`) is then:
//!
//! 1. dropped if any decoy scores at least `reject_threshold` on the same
//!    frame (the dedup timestamp is left alone),
//! 2. dropped if it lies within `min_interval_sec` of the previous attempt,
//! 3. dropped if at least `post_check_reject_limit` of the following
//!    `post_check_frames` frames match a decoy (this still counts as an
//!    attempt for dedup),
//! 4. otherwise accepted, with its recognition frame picked by
//!    [`RecognitionFrameSelector`].

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame_source::{CursorGuard, FrameSource};
use crate::params::DetectionParameters;
use crate::pattern::ReferencePattern;
use crate::preprocess::{self, EdgeMap};
use crate::selector::{OffsetChoice, RecognitionFrameSelector};

/// Log progress every this many seconds of video.
const PROGRESS_INTERVAL_SEC: f64 = 60.0;

// =============================================================================
// Results
// =============================================================================

/// One accepted scene hit.
#[derive(Clone)]
pub struct Detection {
    /// Seconds from the start of the stream (`frame_index / fps`)
    pub timestamp: f64,
    /// Index of the accepted frame
    pub frame_index: u64,
    /// Positive pattern score of the accepted frame
    pub confidence: f64,
    /// Crop-region copy of the recognition frame
    pub frame: RgbImage,
    /// Index of the frame `frame` was cut from
    pub recognition_frame_index: u64,
    pub recognition_choice: OffsetChoice,
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("timestamp", &self.timestamp)
            .field("frame_index", &self.frame_index)
            .field("confidence", &self.confidence)
            .field("frame", &self.frame.dimensions())
            .field("recognition_frame_index", &self.recognition_frame_index)
            .field("recognition_choice", &self.recognition_choice)
            .finish()
    }
}

/// Counters collected during a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    /// Sampled frames scoring at or above `threshold`
    pub candidates: u64,
    pub rejected_decoy: u64,
    pub rejected_dedup: u64,
    pub rejected_lookahead: u64,
    /// Frames decoded for lookahead validation
    pub lookahead_frames: u64,
    pub accepted: u64,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Detections plus counters of a completed scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub detections: Vec<Detection>,
    pub stats: ScanStats,
}

// =============================================================================
// Configuration
// =============================================================================

/// What a decode failure does to detections found before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Discard everything; the error carries no partial results.
    #[default]
    AllOrNothing,
    /// Hand detections found so far back inside [`MediaError::ScanAborted`].
    Resumable,
}

impl FromStr for AbortPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Ok(AbortPolicy::AllOrNothing),
            "resumable" => Ok(AbortPolicy::Resumable),
            other => Err(format!("unknown abort policy: {}", other)),
        }
    }
}

/// Frame range to scan: `[start_frame, end_frame)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanWindow {
    pub start_frame: u64,
    /// `None` scans to the end of the stream
    pub end_frame: Option<u64>,
}

impl ScanWindow {
    /// The whole stream.
    pub fn full() -> Self {
        Self::default()
    }

    /// Window from `start_sec` lasting `duration_sec` (to the end when `None`).
    pub fn from_seconds(start_sec: f64, duration_sec: Option<f64>, fps: f64) -> Self {
        let start_frame = (start_sec.max(0.0) * fps) as u64;
        let end_frame = duration_sec.map(|d| start_frame + (d.max(0.0) * fps) as u64);
        Self {
            start_frame,
            end_frame,
        }
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Scene scanner for one detection profile.
#[derive(Debug, Clone)]
pub struct SceneMatcher {
    params: DetectionParameters,
    positive: ReferencePattern,
    decoys: Vec<ReferencePattern>,
    selector: RecognitionFrameSelector,
    abort_policy: AbortPolicy,
}

/// Per-scan mutable state.
struct ScanState {
    start: u64,
    prev_timestamp: Option<f64>,
    detections: Vec<Detection>,
    stats: ScanStats,
}

impl SceneMatcher {
    /// Build from already loaded patterns.
    pub fn new(
        params: DetectionParameters,
        positive: ReferencePattern,
        decoys: Vec<ReferencePattern>,
    ) -> MediaResult<Self> {
        params.validate()?;

        let (w, h) = (params.search_region.width(), params.search_region.height());
        positive.check_fits(w, h)?;
        for decoy in &decoys {
            decoy.check_fits(w, h)?;
        }

        let selector = RecognitionFrameSelector::from_params(&params);
        Ok(Self {
            params,
            positive,
            decoys,
            selector,
            abort_policy: AbortPolicy::default(),
        })
    }

    /// Load the positive and decoy templates named by `params`.
    pub fn from_params(params: DetectionParameters) -> MediaResult<Self> {
        let positive = ReferencePattern::load(&params.template_path)?;
        let decoys = params
            .reject_templates
            .iter()
            .map(ReferencePattern::load)
            .collect::<MediaResult<Vec<_>>>()?;

        info!(
            profile = %params.profile,
            positive = %positive.name(),
            decoys = decoys.len(),
            "Scene matcher ready"
        );
        Self::new(params, positive, decoys)
    }

    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    pub fn params(&self) -> &DetectionParameters {
        &self.params
    }

    pub fn abort_policy(&self) -> AbortPolicy {
        self.abort_policy
    }

    /// Scan `window` of `source`.
    ///
    /// On a decode failure the scan stops with [`MediaError::ScanAborted`];
    /// whether it carries the detections found so far depends on the
    /// [`AbortPolicy`]. Configuration errors found mid-scan (e.g. a search
    /// region outside the frame) are returned as-is.
    pub fn scan<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        window: ScanWindow,
    ) -> MediaResult<ScanOutcome> {
        let started = Instant::now();
        let fps = source.frame_rate();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MediaError::InvalidVideo(format!("invalid frame rate {}", fps)));
        }

        let end = window.end_frame.or_else(|| source.frame_count());
        let mut state = ScanState {
            start: window.start_frame,
            prev_timestamp: None,
            detections: Vec::new(),
            stats: ScanStats::default(),
        };

        info!(
            start_frame = window.start_frame,
            end_frame = ?end,
            fps,
            threshold = self.params.threshold,
            "Scanning for round-start scenes"
        );

        source.seek(window.start_frame)?;
        let progress_every = ((fps * PROGRESS_INTERVAL_SEC) as u64).max(1);
        let mut index = window.start_frame;

        loop {
            if end.is_some_and(|end| index >= end) {
                break;
            }

            let frame = match source.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(self.abort(index, state, started, e)),
            };
            state.stats.frames_decoded += 1;

            let offset = index - state.start;
            if offset > 0 && offset % progress_every == 0 {
                debug!(
                    frame_index = index,
                    seconds = index as f64 / fps,
                    detections = state.detections.len(),
                    "Scan progress"
                );
            }

            if offset % self.params.frame_interval == 0 {
                state.stats.frames_sampled += 1;
                match self.evaluate(source, index, &frame, fps, &mut state) {
                    Ok(Some(detection)) => state.detections.push(detection),
                    Ok(None) => {}
                    Err(e) if e.is_config_error() => return Err(e),
                    Err(e) => return Err(self.abort(index, state, started, e)),
                }
            }

            index += 1;
        }

        state.stats.elapsed = started.elapsed();
        crate::metrics::record_scan(&state.stats);
        info!(
            detections = state.detections.len(),
            frames = state.stats.frames_decoded,
            sampled = state.stats.frames_sampled,
            rejected_decoy = state.stats.rejected_decoy,
            rejected_dedup = state.stats.rejected_dedup,
            rejected_lookahead = state.stats.rejected_lookahead,
            elapsed_secs = state.stats.elapsed.as_secs_f64(),
            "Scan complete"
        );

        Ok(ScanOutcome {
            detections: state.detections,
            stats: state.stats,
        })
    }

    /// Run the candidate pipeline on one sampled frame.
    fn evaluate<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        index: u64,
        frame: &RgbImage,
        fps: f64,
        state: &mut ScanState,
    ) -> MediaResult<Option<Detection>> {
        let edges = self.search_edges(frame)?;
        let best = self.positive.best_match(&edges)?;
        if best.score < self.params.threshold {
            return Ok(None);
        }
        state.stats.candidates += 1;

        let timestamp = index as f64 / fps;

        if let Some((decoy, score)) = self.first_decoy_hit(&edges)? {
            state.stats.rejected_decoy += 1;
            debug!(
                frame_index = index,
                timestamp,
                decoy = %decoy,
                score,
                "Rejected candidate: decoy on same frame"
            );
            return Ok(None);
        }

        if let Some(prev) = state.prev_timestamp {
            if timestamp - prev < self.params.min_interval_sec {
                state.stats.rejected_dedup += 1;
                return Ok(None);
            }
        }

        if self.params.lookahead_enabled() && !self.decoys.is_empty() {
            let decoy_frames = self.count_lookahead_decoys(source, index, &mut state.stats)?;
            if decoy_frames >= self.params.post_check_reject_limit {
                state.prev_timestamp = Some(timestamp);
                state.stats.rejected_lookahead += 1;
                debug!(
                    frame_index = index,
                    timestamp,
                    decoy_frames,
                    limit = self.params.post_check_reject_limit,
                    "Rejected candidate: decoys in following frames"
                );
                return Ok(None);
            }
        }

        state.prev_timestamp = Some(timestamp);

        let accepted_crop = self.params.crop_region.crop(frame).ok_or_else(|| {
            MediaError::config(format!(
                "crop region {} lies outside the {}x{} frame",
                self.params.crop_region,
                frame.width(),
                frame.height()
            ))
        })?;
        let selected = self.selector.select(source, index, accepted_crop)?;

        state.stats.accepted += 1;
        info!(
            frame_index = index,
            timestamp,
            confidence = best.score,
            recognition_frame = selected.frame_index,
            "Round start detected"
        );

        Ok(Some(Detection {
            timestamp,
            frame_index: index,
            confidence: best.score,
            frame: selected.frame,
            recognition_frame_index: selected.frame_index,
            recognition_choice: selected.choice,
        }))
    }

    fn search_edges(&self, frame: &RgbImage) -> MediaResult<EdgeMap> {
        let region = self.params.search_region.crop(frame).ok_or_else(|| {
            MediaError::config(format!(
                "search region {} lies outside the {}x{} frame",
                self.params.search_region,
                frame.width(),
                frame.height()
            ))
        })?;
        Ok(preprocess::prepare(&region))
    }

    /// First decoy scoring at or above `reject_threshold`.
    fn first_decoy_hit(&self, edges: &EdgeMap) -> MediaResult<Option<(&str, f64)>> {
        for decoy in &self.decoys {
            let score = decoy.best_match(edges)?.score;
            if score >= self.params.reject_threshold {
                return Ok(Some((decoy.name(), score)));
            }
        }
        Ok(None)
    }

    /// Count decoy frames among `index + 1 ..= index + post_check_frames`.
    ///
    /// Stops early at end of stream or once the limit is reached; the cursor
    /// is restored on every path.
    fn count_lookahead_decoys<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        index: u64,
        stats: &mut ScanStats,
    ) -> MediaResult<u64> {
        let limit = self.params.post_check_reject_limit;
        let mut guard = CursorGuard::new(source);
        guard.seek(index + 1)?;

        let mut count = 0;
        for _ in 0..self.params.post_check_frames {
            if count >= limit {
                break;
            }
            let Some(frame) = guard.read_next()? else {
                break;
            };
            stats.lookahead_frames += 1;

            let edges = self.search_edges(&frame)?;
            if self.first_decoy_hit(&edges)?.is_some() {
                count += 1;
            }
        }

        guard.restore()?;
        Ok(count)
    }

    fn abort(&self, frame_index: u64, state: ScanState, started: Instant, error: MediaError) -> MediaError {
        let mut stats = state.stats;
        stats.elapsed = started.elapsed();
        crate::metrics::record_scan(&stats);

        let partial = match self.abort_policy {
            AbortPolicy::AllOrNothing => Vec::new(),
            AbortPolicy::Resumable => state.detections,
        };
        warn!(
            frame_index,
            policy = ?self.abort_policy,
            kept = partial.len(),
            "Scan aborted: {}",
            error
        );

        MediaError::ScanAborted {
            frame_index,
            partial,
            source: Box::new(error),
        }
    }
}
