//! screentrace-server entry point
//!
//! Boots the rollup store, the in-process queue, the stream processor
//! consumers, and the ingest gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use screentrace_core::config::Config;
use screentrace_core::dedup::MemoryDedupCache;
use screentrace_core::processor::StreamProcessor;
use screentrace_core::queue::MemoryQueue;
use screentrace_core::RollupStore;

use screentrace_server::state::{AppState, IngestLimits, TokenVerifier};

#[derive(Debug, Parser)]
#[command(name = "screentrace-server", about = "screentrace ingest gateway")]
struct Cli {
    /// Path to config.toml (defaults to the XDG config location)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the bind address from config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard = screentrace_core::logging::init_with_stdout(&config.logging, true)
        .context("failed to initialize logging")?;

    tracing::info!("screentrace-server starting up");

    let db_path = config
        .server
        .database_path
        .clone()
        .unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening rollup store");
    let store = Arc::new(RollupStore::open(&db_path).context("failed to open rollup store")?);
    store.migrate().context("failed to run migrations")?;

    let queue = Arc::new(MemoryQueue::new(config.server.queue_partitions));
    let dedup = Arc::new(MemoryDedupCache::new(
        chrono::Duration::hours(config.processor.dedup_retention_hours),
        config.processor.dedup_capacity,
    ));

    // Stream processor consumers, one per partition
    let processor = Arc::new(StreamProcessor::new(
        queue.clone(),
        dedup.clone(),
        store.clone(),
        config.processor.clone(),
    ));
    let _consumers = processor.spawn();

    if config.server.devices.is_empty() {
        tracing::warn!("No device credentials configured; all uploads will be rejected");
    }

    let state = Arc::new(AppState {
        queue,
        store,
        dedup,
        verifier: TokenVerifier::new(&config.server.devices),
        limits: IngestLimits::from_config(&config.server),
    });

    let app = screentrace_server::router(state);

    let bind_addr = cli.bind.unwrap_or_else(|| config.server.bind_addr.clone());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(%bind_addr, "Ingest gateway listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;

    Ok(())
}
