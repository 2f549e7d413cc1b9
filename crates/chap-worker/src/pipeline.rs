//! Per-video orchestration.
//!
//! One message runs through: ledger check, download, scene scan,
//! recognition of every detection, chapter publishing, result sink and
//! intermediate files. Every processed video ends `completed` or `failed` in
//! the ledger; [`Pipeline::process`] returns `Err` only when that terminal
//! state could not be written, so the queue delivers the message again.
//!
//! [`Pipeline::replay`] restarts a video from its intermediate files instead
//! of downloading and scanning it again.

use std::sync::Arc;
use std::time::Instant;

use chap_firestore::ProcessingLedger;
use chap_media::{Detection, MediaError};
use chap_models::{Chapter, DetectionStats, MatchRecord, NewVideoMessage, VideoId, VideoRecord};
use chap_recognition::Recognizer;
use chap_storage::ResultSink;
use chrono::Utc;
use tracing::{info, Instrument};

use crate::error::{WorkerError, WorkerResult};
use crate::fetcher::VideoFetcher;
use crate::intermediate::{summarize, IntermediateStore};
use crate::logging::JobLogger;
use crate::metrics;
use crate::scanner::SceneScanner;
use crate::youtube::ChapterPublisher;

const STEPS: usize = 6;

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The ledger already had the video as completed.
    Skipped,
    Completed { matches: usize },
    /// Recorded as failed; retrying is pointless when `permanent`.
    Failed { error: String, permanent: bool },
}

/// Where a replay starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    /// Recognize the saved frames listed in `detection_summary.json`.
    Recognition,
    /// Publish the chapters of the saved `matches.json`.
    Chapters,
}

/// Where recognition frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSource {
    Scan,
    Saved,
}

/// The orchestrator and its injected collaborators.
pub struct Pipeline {
    ledger: ProcessingLedger,
    fetcher: Arc<dyn VideoFetcher>,
    scanner: Arc<dyn SceneScanner>,
    recognizer: Arc<dyn Recognizer>,
    sink: Arc<dyn ResultSink>,
    intermediate: IntermediateStore,
    chapters: Option<Arc<dyn ChapterPublisher>>,
    save_frames: bool,
}

impl Pipeline {
    pub fn new(
        ledger: ProcessingLedger,
        fetcher: Arc<dyn VideoFetcher>,
        scanner: Arc<dyn SceneScanner>,
        recognizer: Arc<dyn Recognizer>,
        sink: Arc<dyn ResultSink>,
        intermediate: IntermediateStore,
    ) -> Self {
        Self {
            ledger,
            fetcher,
            scanner,
            recognizer,
            sink,
            intermediate,
            chapters: None,
            save_frames: true,
        }
    }

    pub fn with_chapter_publisher(mut self, publisher: Arc<dyn ChapterPublisher>) -> Self {
        self.chapters = Some(publisher);
        self
    }

    pub fn with_frame_saving(mut self, enabled: bool) -> Self {
        self.save_frames = enabled;
        self
    }

    pub fn ledger(&self) -> &ProcessingLedger {
        &self.ledger
    }

    /// Process one new-video message.
    pub async fn process(&self, message: &NewVideoMessage) -> WorkerResult<ProcessOutcome> {
        let video_id = message
            .validate()
            .map_err(|e| WorkerError::invalid_message(e.to_string()))?;
        let logger = JobLogger::new(&video_id, "chapters");
        let span = logger.create_span();

        async {
            let started = Instant::now();
            let title = if message.title.is_empty() { "N/A" } else { message.title.as_str() };
            logger.log_start(title);

            if self.ledger.is_completed(video_id.as_str()).await {
                logger.log_completion("already completed, skipping");
                metrics::record_video("skipped", started.elapsed().as_secs_f64());
                return Ok(ProcessOutcome::Skipped);
            }

            self.mark_processing(video_id.as_str(), &logger).await;
            let result = self.run(&video_id, message, &logger).await;
            self.finish(video_id.as_str(), result, &logger, started).await
        }
        .instrument(span)
        .await
    }

    /// Run a video again from its intermediate files.
    ///
    /// Completed videos are not skipped. Missing intermediate files fail the
    /// video permanently.
    pub async fn replay(
        &self,
        message: &NewVideoMessage,
        from: ReplayStep,
    ) -> WorkerResult<ProcessOutcome> {
        let video_id = message
            .validate()
            .map_err(|e| WorkerError::invalid_message(e.to_string()))?;
        let logger = JobLogger::new(&video_id, "replay");
        let span = logger.create_span();

        async {
            let started = Instant::now();
            logger.log_start(&format!("replay from {:?}", from));

            self.mark_processing(video_id.as_str(), &logger).await;
            let result = self.resume(&video_id, message, from, &logger).await;
            self.finish(video_id.as_str(), result, &logger, started).await
        }
        .instrument(span)
        .await
    }

    async fn mark_processing(&self, video_id: &str, logger: &JobLogger) {
        if let Err(e) = self.ledger.mark_processing(video_id).await {
            logger.log_warning(&format!("could not record processing state: {}", e));
        }
    }

    /// Write the terminal ledger state for a run.
    async fn finish(
        &self,
        video_id: &str,
        result: WorkerResult<usize>,
        logger: &JobLogger,
        started: Instant,
    ) -> WorkerResult<ProcessOutcome> {
        match result {
            Ok(count) => match self.ledger.mark_completed(video_id, count as u32).await {
                Ok(()) => {
                    metrics::record_video("completed", started.elapsed().as_secs_f64());
                    logger.log_completion(&format!("{} matches", count));
                    Ok(ProcessOutcome::Completed { matches: count })
                }
                // Fall back to a failed record so the message is still acknowledged.
                Err(e) => {
                    let error = format!("could not record completion: {}", e);
                    logger.log_error(&error);
                    self.record_failure(video_id, error, false, started).await
                }
            },
            Err(e) => {
                let error = e.to_string();
                logger.log_error(&error);
                self.record_failure(video_id, error, e.is_permanent_failure(), started)
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        video_id: &str,
        error: String,
        permanent: bool,
        started: Instant,
    ) -> WorkerResult<ProcessOutcome> {
        self.ledger.mark_failed(video_id, &error).await.map_err(|le| {
            WorkerError::ledger_failed(format!("could not record failure ({}): {}", error, le))
        })?;
        metrics::record_video("failed", started.elapsed().as_secs_f64());
        Ok(ProcessOutcome::Failed { error, permanent })
    }

    /// Returns the number of recognized matches.
    async fn run(
        &self,
        video_id: &VideoId,
        message: &NewVideoMessage,
        logger: &JobLogger,
    ) -> WorkerResult<usize> {
        let id = video_id.as_str();

        logger.log_step(1, STEPS, "Downloading video");
        let path = self.fetcher.fetch(video_id).await?;

        logger.log_step(2, STEPS, "Detecting match scenes");
        let outcome = match self.scanner.scan(&path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.save_partial(id, &e, logger).await;
                return Err(e.into());
            }
        };
        let detections = outcome.detections;
        logger.log_progress(&format!("found {} matches", detections.len()));

        let summary = summarize(id, &detections).with_total_frames(outcome.stats.frames_decoded);
        if let Err(e) = self.intermediate.save_detection_summary(&summary).await {
            logger.log_warning(&format!("could not save detection summary: {}", e));
        }

        if detections.is_empty() {
            logger.log_progress("no matches found, nothing to publish");
            return Ok(0);
        }

        logger.log_step(3, STEPS, "Recognizing characters");
        let indexed: Vec<(usize, &Detection)> = detections.iter().enumerate().map(|(i, d)| (i + 1, d)).collect();
        let matches = self.recognize_all(id, indexed, FrameSource::Scan, logger).await;

        let stats = DetectionStats {
            total_frames: outcome.stats.frames_decoded,
            matched_frames: detections.len() as u64,
        };
        self.publish(id, message, matches, stats, logger).await
    }

    /// Replay body; returns the number of published matches.
    async fn resume(
        &self,
        video_id: &VideoId,
        message: &NewVideoMessage,
        from: ReplayStep,
        logger: &JobLogger,
    ) -> WorkerResult<usize> {
        let id = video_id.as_str();
        let summary = self
            .intermediate
            .load_detection_summary(id)
            .await?
            .ok_or_else(|| WorkerError::missing_intermediate(format!("no detection summary for {}", id)))?;
        if summary.detections.is_empty() {
            logger.log_progress("no matches found, nothing to publish");
            return Ok(0);
        }

        let matches = match from {
            ReplayStep::Recognition => {
                let detections = self.intermediate.load_detections(&summary).await;
                logger.log_progress(&format!(
                    "loaded {} of {} saved frames",
                    detections.len(),
                    summary.total_detections
                ));
                logger.log_step(3, STEPS, "Recognizing characters");
                let indexed: Vec<(usize, &Detection)> = detections.iter().map(|(index, d)| (*index, d)).collect();
                self.recognize_all(id, indexed, FrameSource::Saved, logger).await
            }
            ReplayStep::Chapters => {
                let matches = self
                    .intermediate
                    .load_matches(id)
                    .await?
                    .ok_or_else(|| WorkerError::missing_intermediate(format!("no saved matches for {}", id)))?;
                logger.log_progress(&format!("loaded {} saved matches", matches.len()));
                matches
            }
        };

        let stats = DetectionStats {
            total_frames: summary.total_frames.unwrap_or(0),
            matched_frames: summary.total_detections as u64,
        };
        self.publish(id, message, matches, stats, logger).await
    }

    /// Steps 4 to 6: chapters, result sink and final intermediate files.
    async fn publish(
        &self,
        id: &str,
        message: &NewVideoMessage,
        matches: Vec<MatchRecord>,
        detection_stats: DetectionStats,
        logger: &JobLogger,
    ) -> WorkerResult<usize> {
        let chapters: Vec<Chapter> = matches
            .iter()
            .enumerate()
            .map(|(i, record)| Chapter::for_match(i + 1, record))
            .collect();
        for chapter in &chapters {
            info!(video_id = id, start_time = chapter.start_time, "{}", chapter.title);
        }

        logger.log_step(4, STEPS, "Updating YouTube chapters");
        match &self.chapters {
            Some(_) if chapters.is_empty() => {
                logger.log_warning("no recognized matches, leaving the description unchanged")
            }
            Some(publisher) => publisher.publish_chapters(id, &chapters).await?,
            None => logger.log_progress("chapter publishing disabled"),
        }

        let video = VideoRecord {
            video_id: id.to_string(),
            title: message.title.clone(),
            channel_id: message.channel_id.clone(),
            channel_title: message.channel_title.clone(),
            published_at: message.published_at.clone(),
            processed_at: Utc::now(),
            chapters,
            detection_stats,
        };

        logger.log_step(5, STEPS, &format!("Publishing results to {}", self.sink.describe()));
        let summary = self.sink.publish(&video, &matches).await?;
        logger.log_progress(&format!("wrote {} objects", summary.written.len()));

        logger.log_step(6, STEPS, "Saving final results");
        if let Err(e) = self.intermediate.save_final_results(&video).await {
            logger.log_warning(&format!("could not save final results: {}", e));
        }

        metrics::record_matches(matches.len());
        Ok(matches.len())
    }

    /// Recognize every `(index, detection)`; failures drop that detection
    /// only. The recognized matches are saved before anything is published.
    async fn recognize_all<'a>(
        &self,
        video_id: &str,
        detections: impl IntoIterator<Item = (usize, &'a Detection)>,
        source: FrameSource,
        logger: &JobLogger,
    ) -> Vec<MatchRecord> {
        let mut matches = Vec::new();

        for (index, detection) in detections {
            let saved_frame = match source {
                FrameSource::Saved => Some(
                    self.intermediate
                        .frame_path(video_id, index, detection.timestamp)
                        .display()
                        .to_string(),
                ),
                FrameSource::Scan if self.save_frames => {
                    match self.intermediate.save_frame(video_id, index, detection).await {
                        Ok(path) => Some(path.display().to_string()),
                        Err(e) => {
                            logger.log_warning(&format!("could not save frame {}: {}", index, e));
                            None
                        }
                    }
                }
                FrameSource::Scan => None,
            };

            match self.recognizer.recognize(&detection.frame).await {
                Ok(recognition) => {
                    let mut record = MatchRecord::new(
                        video_id,
                        detection.timestamp,
                        detection.frame_index,
                        detection.confidence,
                        &recognition.labels,
                        &recognition.raw,
                    );
                    record.saved_frame_path = saved_frame;
                    matches.push(record);
                }
                Err(e) => {
                    metrics::record_recognition_skipped();
                    logger.log_warning(&format!(
                        "recognition failed for match {} at {:.1}s, skipping: {}",
                        index, detection.timestamp, e
                    ));
                }
            }
        }

        if let Err(e) = self.intermediate.save_matches(video_id, &matches).await {
            logger.log_warning(&format!("could not save matches: {}", e));
        }
        matches
    }

    async fn save_partial(&self, video_id: &str, error: &MediaError, logger: &JobLogger) {
        if let MediaError::ScanAborted {
            frame_index,
            partial,
            ..
        } = error
        {
            if partial.is_empty() {
                return;
            }
            logger.log_warning(&format!(
                "scan aborted at frame {}, keeping {} partial detections",
                frame_index,
                partial.len()
            ));
            let summary = summarize(video_id, partial).with_abort(*frame_index);
            if let Err(e) = self.intermediate.save_detection_summary(&summary).await {
                logger.log_warning(&format!("could not save partial detections: {}", e));
            }
            if !self.save_frames {
                return;
            }
            for (i, detection) in partial.iter().enumerate() {
                if let Err(e) = self.intermediate.save_frame(video_id, i + 1, detection).await {
                    logger.log_warning(&format!("could not save frame {}: {}", i + 1, e));
                }
            }
        }
    }
}
