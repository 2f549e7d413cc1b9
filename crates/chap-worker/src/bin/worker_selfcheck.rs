use std::path::Path;
use std::process::Command;

use chap_media::{DetectionParameters, SceneMatcher};
use chap_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.intermediate_dir).await?;
    for tool in ["ffmpeg", "ffprobe", "yt-dlp"] {
        ensure_tool(tool)?;
    }
    ensure_env_present(&["REDIS_URL", "GEMINI_API_KEY"])?;
    ensure_detection_profile(&config)?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let flag = if name == "yt-dlp" { "--version" } else { "-version" };
    let output = Command::new(name)
        .arg(flag)
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} {} failed: {:?}", name, flag, output.status));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

/// Loads the profile and every reference pattern it names.
fn ensure_detection_profile(config: &WorkerConfig) -> anyhow::Result<()> {
    let params = DetectionParameters::load(&config.detection_config_path, &config.detection_profile)?;
    let templates = 1 + params.reject_templates.len();
    SceneMatcher::from_params(params)?;
    println!(
        "worker-selfcheck: profile '{}' ok ({} templates)",
        config.detection_profile, templates
    );
    Ok(())
}
