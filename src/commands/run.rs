//! The long-running service: ingestion loop plus summarization loop.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info};

use crate::config::Config;
use crate::db::PgPool;
use crate::geo::GeoIndex;
use crate::pipeline::{self, Pipeline};
use crate::summarizer::Summarizer;

pub async fn handle_run(config: Config, pool: PgPool) -> Result<()> {
    // Geometry failures are startup-fatal; the caller exits non-zero.
    let geo = Arc::new(
        GeoIndex::load(&config.boundary_path, &config.sectors_path)
            .context("failed to load geometry")?,
    );
    info!(
        "Loaded boundary and {} sectors from {} / {}",
        geo.sector_count(),
        config.boundary_path.display(),
        config.sectors_path.display()
    );

    let mut pipeline = Pipeline::new(&config, Arc::clone(&geo), pool.clone())?;
    pipeline.restore_state().await?;

    let summarizer = Summarizer::new(
        pool,
        config.flight_completion_hours,
        config.archive_retention_days,
        config.summarize_batch_limit,
    );

    let token = CancellationToken::new();
    spawn_shutdown_handler(token.clone());

    let summarize_interval = std::time::Duration::from_secs(config.summarize_interval_secs.max(1));
    let summarizer_task = tokio::spawn(
        pipeline::run_summarizer(summarizer, summarize_interval, token.clone())
            .instrument(tracing::info_span!("summarizer_loop")),
    );

    pipeline.run(token.clone()).await;

    // The ingestion loop has drained; stop the summarizer and wait for any
    // in-flight transaction to finish.
    token.cancel();
    summarizer_task.await.context("summarizer task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Cancel the run token on SIGINT or SIGTERM.
fn spawn_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("Unable to listen for SIGTERM: {}", e);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            }
        }
        #[cfg(not(unix))]
        {
            if ctrl_c.await.is_ok() {
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
        }
        token.cancel();
    });
}
