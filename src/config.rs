//! Typed service configuration.
//!
//! Settings come from a TOML file resolved via `SKYWATCH_CONFIG`, with serde
//! defaults for every tunable so a minimal file (or none at all) runs with
//! the documented defaults. The database URL comes from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::RadiusTable;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream snapshot endpoint.
    pub feed_url: String,
    /// Ingestion cadence in seconds.
    pub poll_interval_secs: u64,
    /// Summarization cadence in seconds.
    pub summarize_interval_secs: u64,
    /// A flight whose newest sample is older than this is complete.
    pub flight_completion_hours: i64,
    /// Archive rows older than this are deleted.
    pub archive_retention_days: i64,
    /// An aircraft silent for longer than this gets its sectors closed.
    pub cleanup_timeout_secs: i64,
    /// Completed flights summarized per pass.
    pub summarize_batch_limit: i64,
    pub boundary_path: PathBuf,
    pub sectors_path: PathBuf,
    /// Prometheus scrape port; no listener when unset.
    pub metrics_port: Option<u16>,
    pub fetch: FetchConfig,
    pub database: DatabaseConfig,
    pub radii: RadiusTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://data.vatsim.net/v3/vatsim-data.json".to_string(),
            poll_interval_secs: 60,
            summarize_interval_secs: 3600,
            flight_completion_hours: 14,
            archive_retention_days: 7,
            cleanup_timeout_secs: 300,
            summarize_batch_limit: 50,
            boundary_path: PathBuf::from("./data/boundary.json"),
            sectors_path: PathBuf::from("./data/sectors.json"),
            metrics_port: None,
            fetch: FetchConfig::default(),
            database: DatabaseConfig::default(),
            radii: RadiusTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Total connections: the base pool plus overflow headroom.
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
    pub recycle_secs: u64,
    pub statement_timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: 60,
            acquire_timeout_secs: 10,
            recycle_secs: 3600,
            statement_timeout_secs: 10,
            batch_size: 500,
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Load from the resolved path, falling back to defaults when no file
    /// exists at the development default location.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `SKYWATCH_CONFIG` env var
/// 2. `/etc/skywatch/config.toml` (production/staging)
/// 3. `./skywatch.toml` (development)
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SKYWATCH_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("SKYWATCH_ENV").as_deref() {
        Ok("production") | Ok("staging") => PathBuf::from("/etc/skywatch/config.toml"),
        _ => PathBuf::from("./skywatch.toml"),
    }
}

/// The database URL is environment-only; it never lives in the config file.
pub fn database_url() -> Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.summarize_interval_secs, 3600);
        assert_eq!(config.flight_completion_hours, 14);
        assert_eq!(config.archive_retention_days, 7);
        assert_eq!(config.cleanup_timeout_secs, 300);
        assert_eq!(config.fetch.connect_timeout_secs, 10);
        assert_eq!(config.fetch.request_timeout_secs, 30);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.database.batch_size, 500);
        assert_eq!(config.radii.center_nm, 400.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            poll_interval_secs = 15
            [radii]
            tower_nm = 20.0
        "#,
        )
        .unwrap();
        assert_eq!(parsed.poll_interval_secs, 15);
        assert_eq!(parsed.summarize_interval_secs, 3600);
        assert_eq!(parsed.radii.tower_nm, 20.0);
        assert_eq!(parsed.radii.center_nm, 400.0);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.poll_interval_secs = 30;
        config.metrics_port = Some(9091);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.poll_interval_secs, 30);
        assert_eq!(parsed.metrics_port, Some(9091));
        assert_eq!(parsed.database.pool_size, 60);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skywatch.toml");
        std::fs::write(
            &path,
            r#"
            feed_url = "http://localhost:9999/snapshot.json"
            cleanup_timeout_secs = 120
        "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed_url, "http://localhost:9999/snapshot.json");
        assert_eq!(config.cleanup_timeout_secs, 120);
    }
}
