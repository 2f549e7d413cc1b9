//! Operator commands against the queue, the ledger and intermediate files.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use chap_firestore::{FirestoreClient, FirestoreLedgerStore, ProcessingLedger};
use chap_models::NewVideoMessage;
use chap_queue::{MessageQueue, RedisQueue};
use chap_worker::{build_pipeline, ProcessOutcome, ReplayStep, WorkerConfig, YouTubeClient};

#[derive(Parser)]
#[command(name = "chap-admin")]
#[command(about = "Operator commands for the chapter worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register videos as queued and publish them
    Enqueue {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Queue recent uploads of the given channels
    Discover {
        /// Channel id; repeat for several channels
        #[arg(long, required = true)]
        channel: Vec<String>,
        /// Look back this many hours
        #[arg(long, default_value_t = 1)]
        hours: i64,
    },
    /// Record counts per status
    Stats,
    /// Most recent failures
    Failed {
        #[arg(default_value_t = 20)]
        limit: usize,
    },
    /// Stream and dead-letter lengths
    Queue,
    /// Run a video again from its intermediate files
    Replay {
        video_id: String,
        #[arg(long, value_enum)]
        from: Step,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Step {
    Recognition,
    Chapters,
}

impl From<Step> for ReplayStep {
    fn from(step: Step) -> Self {
        match step {
            Step::Recognition => ReplayStep::Recognition,
            Step::Chapters => ReplayStep::Chapters,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match Cli::parse().command {
        Command::Enqueue { ids } => enqueue(&ids).await,
        Command::Discover { channel, hours } => discover(&channel, hours).await,
        Command::Stats => stats().await,
        Command::Failed { limit } => failed(limit).await,
        Command::Queue => queue_lengths().await,
        Command::Replay { video_id, from } => replay(&video_id, from.into()).await,
    }
}

async fn ledger() -> anyhow::Result<ProcessingLedger> {
    let client = FirestoreClient::from_env()
        .await
        .context("Failed to create Firestore client")?;
    Ok(ProcessingLedger::new(Arc::new(FirestoreLedgerStore::new(client))))
}

/// Videos the ledger already knows are not published again.
async fn publish_new(
    ledger: &ProcessingLedger,
    queue: &RedisQueue,
    message: &NewVideoMessage,
) -> anyhow::Result<()> {
    if !ledger.register_queued(message).await? {
        println!("{}: already known, skipped", message.video_id);
        return Ok(());
    }
    let entry = queue.publish(message).await?;
    println!("{}: queued as {}", message.video_id, entry);
    Ok(())
}

async fn enqueue(video_ids: &[String]) -> anyhow::Result<()> {
    let ledger = ledger().await?;
    let queue = RedisQueue::from_env()?;
    queue.init().await?;

    for id in video_ids {
        publish_new(&ledger, &queue, &NewVideoMessage::new(id.as_str())).await?;
    }
    Ok(())
}

async fn discover(channels: &[String], hours: i64) -> anyhow::Result<()> {
    let youtube = YouTubeClient::from_env().context("Failed to configure YouTube client")?;
    let ledger = ledger().await?;
    let queue = RedisQueue::from_env()?;
    queue.init().await?;

    let since = Utc::now() - Duration::hours(hours);
    for channel in channels.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        let videos = youtube
            .recent_uploads(channel, since)
            .await
            .with_context(|| format!("Failed to list uploads of {}", channel))?;
        println!("{}: {} recent uploads", channel, videos.len());
        for video in &videos {
            publish_new(&ledger, &queue, video).await?;
        }
    }
    Ok(())
}

async fn stats() -> anyhow::Result<()> {
    let stats = ledger().await?.stats().await?;
    println!("queued:     {}", stats.queued);
    println!("processing: {}", stats.processing);
    println!("completed:  {}", stats.completed);
    println!("failed:     {}", stats.failed);
    println!("total:      {}", stats.total());
    Ok(())
}

async fn failed(limit: usize) -> anyhow::Result<()> {
    for record in ledger().await?.failed_items(limit).await? {
        let at = record
            .failed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}",
            record.video_id,
            at,
            record.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn queue_lengths() -> anyhow::Result<()> {
    let queue = RedisQueue::from_env()?;
    println!("{}", queue.describe());
    println!("pending stream length: {}", queue.len().await?);
    println!("dead-letter length:    {}", queue.dlq_len().await?);
    Ok(())
}

/// Video metadata comes from the ledger record when there is one.
async fn replay(video_id: &str, from: ReplayStep) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let pipeline = build_pipeline(&config).await?;

    let mut message = NewVideoMessage::new(video_id);
    if let Some(record) = pipeline.ledger().get(video_id).await? {
        message.title = record.title.unwrap_or_default();
        message.channel_id = record.channel_id.unwrap_or_default();
        message.channel_title = record.channel_title.unwrap_or_default();
        message.published_at = record.published_at.unwrap_or_default();
    }

    match pipeline.replay(&message, from).await? {
        ProcessOutcome::Completed { matches } => println!("{}: completed, {} matches", video_id, matches),
        ProcessOutcome::Failed { error, .. } => anyhow::bail!("{}: failed: {}", video_id, error),
        ProcessOutcome::Skipped => println!("{}: skipped", video_id),
    }
    Ok(())
}
