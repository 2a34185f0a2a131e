//! One-shot summarization pass, for backfills.

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::db::PgPool;
use crate::summarizer::Summarizer;

pub async fn handle_summarize_once(config: Config, pool: PgPool) -> Result<()> {
    let summarizer = Summarizer::new(
        pool,
        config.flight_completion_hours,
        config.archive_retention_days,
        config.summarize_batch_limit,
    );

    let stats = summarizer.run_once().await?;
    info!(
        "Summarized {} flights ({} skipped), archived {} rows, purged {} archive rows",
        stats.summarized, stats.skipped, stats.archived_rows, stats.purged_rows
    );
    Ok(())
}
