//! Expression clip worker binary.
//!
//! Reads an episode manifest (JSON), renders every expression and prints the
//! status records as JSON on stdout.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lclip_media::FfmpegEngine;
use lclip_worker::{
    CommandNarration, DisabledNarration, EpisodeManifest, JobExecutor, NarrationSource,
    PipelineConfig, PipelineCoordinator,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("lclip=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting lclip-worker");

    match run().await {
        Ok(all_succeeded) => {
            if !all_succeeded {
                std::process::exit(2);
            }
        }
        Err(e) => {
            error!("Worker error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let manifest_path = std::env::args()
        .nth(1)
        .context("usage: lclip-worker <manifest.json>")?;

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        lclip_worker::metrics::install_prometheus(addr)?;
        info!("Serving metrics on {}", addr);
    }

    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let engine = FfmpegEngine::detect().context("locating ffmpeg")?;
    let narration: Arc<dyn NarrationSource> = match (&config.narration_command, config.narration_enabled) {
        (Some(command), true) => Arc::new(CommandNarration::new(command, config.subprocess_timeout)?),
        (None, true) => {
            warn!("Narration enabled without LCLIP_NARRATION_COMMAND, using original audio");
            Arc::new(DisabledNarration)
        }
        _ => Arc::new(DisabledNarration),
    };

    let coordinator = PipelineCoordinator::new(config, Arc::new(engine), narration)?;
    let executor = Arc::new(JobExecutor::new(coordinator));

    let manifest = EpisodeManifest::from_json_file(&manifest_path)?;

    // Ctrl-C cancels jobs at their next stage transition.
    let signal_executor = Arc::clone(&executor);
    let signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    let records = executor.run_manifest(&manifest).await?;
    signal_handle.abort();

    let succeeded = records.iter().filter(|r| r.is_success()).count();
    info!("{}/{} job(s) succeeded", succeeded, records.len());
    println!("{}", serde_json::to_string_pretty(&records)?);

    Ok(succeeded == records.len())
}
