//! screentrace-agent entry point
//!
//! Periodic, single-threaded collection per device: each tick scans the
//! local activity log from the cursor, runs the collection pipeline, and
//! uploads whatever survives. The cursor only advances after the server
//! acknowledges the batch (or the cycle produced nothing), so a crash
//! mid-flight just means a resend the server will dedup.

mod source;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;

use screentrace_core::agent::{
    run_cycle, CursorStore, CycleOutcome, DeviceContext, StaticCredentials, UploadClient,
};
use screentrace_core::config::Config;

use crate::source::JsonlActivityLog;

#[derive(Debug, Parser)]
#[command(name = "screentrace-agent", about = "screentrace device agent")]
struct Cli {
    /// Path to config.toml (defaults to the XDG config location)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Run a single collection cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard = screentrace_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    tracing::info!("screentrace-agent starting up");

    config.upload.validate().context("invalid upload config")?;
    if !config.upload.is_ready() {
        bail!("upload is not configured; set [upload] in config.toml");
    }
    let device_id = config
        .upload
        .device_id
        .clone()
        .context("upload.device_id is required")?;
    let api_key = config
        .upload
        .api_key
        .clone()
        .context("upload.api_key is required")?;

    let activity_log_path = config
        .agent
        .activity_log
        .clone()
        .context("agent.activity_log is required")?;
    let activity_log = JsonlActivityLog::new(&activity_log_path);

    let credentials = Arc::new(StaticCredentials::new(api_key));
    let cursors = Arc::new(
        CursorStore::open(&Config::cursor_path()).context("failed to open cursor store")?,
    );
    for cursor in cursors.snapshot() {
        tracing::info!(
            device = %cursor.device_id,
            last_confirmed = %cursor.last_confirmed,
            "Restored upload cursor"
        );
    }
    let ctx = DeviceContext::new(
        device_id.clone(),
        config.agent.clone(),
        credentials.clone(),
        cursors,
    );
    let client =
        UploadClient::new(config.upload.clone(), credentials).context("failed to build client")?;

    tracing::info!(
        device = %device_id,
        log = %activity_log_path.display(),
        interval_secs = config.agent.poll_interval_secs,
        "Collection loop starting"
    );

    if cli.once {
        let report = run_cycle(&ctx, &activity_log, &client, Utc::now()).await?;
        print_report(&report);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(StdDuration::from_secs(config.agent.poll_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cycle(&ctx, &activity_log, &client, Utc::now()).await {
                    Ok(report) => print_report(&report),
                    Err(e) => tracing::error!(error = %e, "Collection cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn print_report(report: &screentrace_core::agent::CycleReport) {
    match &report.outcome {
        CycleOutcome::Idle => {
            tracing::debug!(
                from = %report.scanned_from,
                to = %report.scanned_to,
                "Cycle complete: nothing to upload"
            );
        }
        CycleOutcome::Uploaded(response) => {
            tracing::info!(
                produced = report.produced,
                accepted = response.accepted,
                duplicates = response.duplicates,
                rejected = response.rejected,
                cursor_advanced = report.cursor_advanced,
                "Cycle complete"
            );
        }
    }
}
