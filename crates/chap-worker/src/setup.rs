//! Collaborator wiring shared by the worker and admin binaries.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use chap_firestore::{FirestoreClient, FirestoreLedgerStore, ProcessingLedger};
use chap_media::{DetectionParameters, DownloadOptions, SceneMatcher};
use chap_recognition::{CharacterAliases, GeminiRecognizer};
use chap_storage::{LocalOutputSink, ObjectStoreSink, R2Client, ResultSink};

use crate::config::WorkerConfig;
use crate::fetcher::YtDlpFetcher;
use crate::intermediate::IntermediateStore;
use crate::pipeline::Pipeline;
use crate::scanner::FfmpegSceneScanner;
use crate::youtube::YouTubeClient;

/// Construct every collaborator; configuration problems are fatal here.
pub async fn build_pipeline(config: &WorkerConfig) -> anyhow::Result<Pipeline> {
    let params = DetectionParameters::load(&config.detection_config_path, &config.detection_profile)
        .context("Invalid detection parameters")?;
    let matcher = SceneMatcher::from_params(params)
        .context("Failed to load reference patterns")?
        .with_abort_policy(config.abort_policy);

    let aliases = if config.aliases_path.exists() {
        CharacterAliases::load(&config.aliases_path).context("Invalid character alias file")?
    } else {
        warn!(
            path = %config.aliases_path.display(),
            "Character alias file not found, labels are used as returned"
        );
        CharacterAliases::passthrough()
    };
    let recognizer = GeminiRecognizer::from_env(aliases).context("Failed to configure Gemini")?;
    info!(models = ?recognizer.models(), "Recognizer ready");

    let ledger = if config.enable_firestore {
        let client = FirestoreClient::from_env()
            .await
            .context("Failed to create Firestore client")?;
        ProcessingLedger::new(Arc::new(FirestoreLedgerStore::new(client)))
    } else {
        warn!("Firestore disabled, using an in-memory ledger");
        ProcessingLedger::in_memory()
    };

    let sink: Arc<dyn ResultSink> = if config.enable_r2 {
        let r2 = R2Client::from_env().await.context("Failed to create R2 client")?;
        Arc::new(ObjectStoreSink::new(Arc::new(r2)))
    } else {
        Arc::new(LocalOutputSink::new(&config.output_dir))
    };
    info!(sink = %sink.describe(), "Result sink ready");

    let fetcher = YtDlpFetcher::new(
        &config.work_dir,
        DownloadOptions {
            format: config.ytdlp_format.clone(),
            cookies_path: config.cookies_path.clone(),
        },
    );

    let mut pipeline = Pipeline::new(
        ledger,
        Arc::new(fetcher),
        Arc::new(FfmpegSceneScanner::new(matcher)),
        Arc::new(recognizer),
        sink,
        IntermediateStore::new(&config.intermediate_dir),
    )
    .with_frame_saving(config.save_frames);

    if config.enable_youtube {
        let publisher =
            YouTubeClient::from_env().context("Failed to configure YouTube client")?;
        pipeline = pipeline.with_chapter_publisher(Arc::new(publisher));
    } else {
        info!("YouTube chapter publishing disabled");
    }

    Ok(pipeline)
}
