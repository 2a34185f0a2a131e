use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use skywatch::commands;
use skywatch::config::{self, Config};
use skywatch::db;

#[derive(Parser, Debug)]
#[command(
    name = "skywatch",
    about = "Regional air-traffic network ingestion and statistics",
    version
)]
struct Cli {
    /// Config file path (overrides SKYWATCH_CONFIG resolution)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion and summarization loops (default)
    Run,
    /// Run a single summarization pass and exit
    SummarizeOnce,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref()).context("invalid configuration")?;

    skywatch::metrics::init(config.metrics_port)?;

    let database_url = config::database_url()?;
    let pool = db::build_pool(&database_url, &config.database)?;
    // An unreachable database is a startup failure, not a tick failure.
    db::verify_connectivity(&pool)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::handle_run(config, pool).await,
        Commands::SummarizeOnce => commands::handle_summarize_once(config, pool).await,
    }
}
