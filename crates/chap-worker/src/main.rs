//! Chapter worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chap_queue::{MessageQueue, RedisQueue};
use chap_worker::{build_pipeline, metrics, Executor, WorkerConfig, WorkerMode};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting chap-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored text for dev, JSON with `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
        info!(port, "Prometheus exporter listening");
    }

    let pipeline = Arc::new(build_pipeline(&config).await?);

    let queue = RedisQueue::from_env().context("Failed to create queue client")?;
    queue.init().await.context("Failed to initialize consumer group")?;
    let queue: Arc<dyn MessageQueue> = Arc::new(queue);

    let executor = Arc::new(Executor::new(config.clone(), queue, pipeline));

    match config.mode {
        WorkerMode::Once => {
            let summary = executor.run_once().await?;
            info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "One-shot run finished"
            );
        }
        WorkerMode::Daemon => {
            let stop = executor.shutdown_handle();
            let mut runner = {
                let executor = executor.clone();
                tokio::spawn(async move { executor.run().await })
            };

            tokio::select! {
                finished = &mut runner => {
                    finished.context("Executor task panicked")??;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let _ = stop.send(true);
                    match tokio::time::timeout(config.shutdown_timeout, runner).await {
                        Ok(finished) => {
                            finished.context("Executor task panicked")??;
                        }
                        Err(_) => warn!(
                            timeout_secs = config.shutdown_timeout.as_secs(),
                            "Executor did not stop in time; the in-flight message will be redelivered"
                        ),
                    }
                }
            }
        }
    }

    Ok(())
}
