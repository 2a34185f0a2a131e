//! Prometheus metrics exporter setup.
//!
//! The recorder is installed once at startup, before either loop runs, so
//! the counters below are visible to the first scrape rather than appearing
//! as events trickle in.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::info;

/// Install the Prometheus recorder. With a port, an HTTP scrape listener is
/// served on it; without one, metrics are recorded but not exported.
pub fn init(port: Option<u16>) -> Result<()> {
    match port {
        Some(port) => {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("failed to install Prometheus exporter")?;
            info!("Metrics exporter listening on {}", addr);
        }
        None => {
            PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install Prometheus recorder")?;
        }
    }

    initialize_metrics();
    Ok(())
}

/// Zero-initialize the service's metrics so dashboards see them before the
/// first event occurs.
fn initialize_metrics() {
    for name in [
        "fetch.success",
        "fetch.retry",
        "fetch.failed",
        "fetch.flights.missing_position",
        "fetch.transceivers.unlinked",
        "pipeline.ticks_completed",
        "pipeline.ticks_skipped",
        "pipeline.ticks_overrun",
        "store.flight_samples.inserted",
        "store.controller_samples.inserted",
        "store.transceiver_samples.inserted",
        "store.interactions.inserted",
        "store.sector_occupancies.opened",
        "store.sector_occupancies.closed",
        "store.sector_occupancies.close_missed",
        "store.sector_occupancies.stale_closed",
        "sector_tracker.duplicate_open_rows",
        "cleanup.aircraft_reconciled",
        "cleanup.failures",
        "summarizer.flights_summarized",
        "summarizer.failures",
        "summarizer.archive_purged",
        "summarizer.pass_failures",
    ] {
        metrics::counter!(name).absolute(0);
    }

    metrics::gauge!("sector_tracker.tracked_aircraft").set(0.0);
    metrics::gauge!("sector_tracker.open_sectors").set(0.0);
}
