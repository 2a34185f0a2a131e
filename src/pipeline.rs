//! The two long-running loops: ingestion and summarization.
//!
//! The ingestion loop drives fetch → filter → sector tracking → proximity
//! pairing → persistence → cleanup once per poll interval. A tick that
//! overruns the interval causes the next tick to be skipped, never queued.
//! Stage failures are tick-scoped (fetch/parse) or batch-scoped (storage);
//! nothing short of startup ever aborts the process.

use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classifier::ControllerClassifier;
use crate::cleanup::Cleanup;
use crate::config::Config;
use crate::controllers_repo::ControllerSamplesRepository;
use crate::db::PgPool;
use crate::fetcher::Fetcher;
use crate::filters;
use crate::flights_repo::FlightSamplesRepository;
use crate::geo::GeoIndex;
use crate::interactions_repo::InteractionsRepository;
use crate::occupancy_repo::SectorOccupancyRepository;
use crate::proximity;
use crate::sector_tracker::SectorTracker;
use crate::summarizer::Summarizer;

pub struct Pipeline {
    fetcher: Fetcher,
    geo: Arc<GeoIndex>,
    classifier: ControllerClassifier,
    tracker: SectorTracker,
    flights_repo: FlightSamplesRepository,
    controllers_repo: ControllerSamplesRepository,
    occupancy_repo: SectorOccupancyRepository,
    interactions_repo: InteractionsRepository,
    cleanup: Cleanup,
    poll_interval: std::time::Duration,
}

impl Pipeline {
    pub fn new(config: &Config, geo: Arc<GeoIndex>, pool: PgPool) -> anyhow::Result<Self> {
        let occupancy_repo = SectorOccupancyRepository::new(pool.clone());
        Ok(Self {
            fetcher: Fetcher::new(config.feed_url.clone(), &config.fetch)?,
            geo,
            classifier: ControllerClassifier::new(config.radii.clone()),
            tracker: SectorTracker::new(),
            flights_repo: FlightSamplesRepository::with_batch_size(
                pool.clone(),
                config.database.batch_size,
            ),
            controllers_repo: ControllerSamplesRepository::new(pool.clone()),
            occupancy_repo: occupancy_repo.clone(),
            interactions_repo: InteractionsRepository::new(pool),
            cleanup: Cleanup::new(occupancy_repo, config.cleanup_timeout_secs),
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs.max(1)),
        })
    }

    /// Restore tracker state from rows that were open at shutdown, repairing
    /// any duplicate-open invariant violations found in storage. Returns
    /// (restored aircraft, repaired rows).
    pub async fn restore_state(&mut self) -> anyhow::Result<(usize, usize)> {
        let rows = self.occupancy_repo.load_active().await?;
        let row_count = rows.len();
        let surplus = self.tracker.seed(rows);
        let repaired = surplus.len();
        for row_id in surplus {
            self.occupancy_repo.close_surplus_row(row_id).await?;
        }
        info!(
            "Restored {} aircraft with {} open sectors from storage ({} surplus rows closed)",
            self.tracker.tracked_count(),
            row_count - repaired,
            repaired
        );
        Ok((self.tracker.tracked_count(), repaired))
    }

    /// Run the ingestion loop until cancelled. On shutdown the current
    /// tick's writes finish and a final cleanup runs before returning.
    pub async fn run(mut self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; that is the startup tick.
        info!(
            "Ingestion loop started (every {:?}, {} sectors loaded)",
            self.poll_interval,
            self.geo.sector_count()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown requested, draining ingestion loop");
                    break;
                }
                _ = interval.tick() => {
                    let started = Instant::now();
                    self.tick().await;
                    let elapsed = started.elapsed();
                    metrics::histogram!("pipeline.tick_duration_seconds")
                        .record(elapsed.as_secs_f64());
                    if elapsed > self.poll_interval {
                        warn!(
                            "Tick took {:?}, longer than the {:?} interval; next tick will be skipped",
                            elapsed, self.poll_interval
                        );
                        metrics::counter!("pipeline.ticks_overrun").increment(1);
                    }
                }
            }
        }

        // Flush reconciliation so no open sector outlives a clean shutdown
        // by a whole restart cycle.
        if let Err(e) = self.cleanup.reconcile(&mut self.tracker).await {
            warn!("Final cleanup on shutdown failed: {}", e);
        }
        info!("Ingestion loop stopped");
    }

    async fn tick(&mut self) {
        // A failed fetch skips the tick entirely; no partial writes.
        let snapshot = match self.fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                metrics::counter!("pipeline.ticks_skipped").increment(1);
                return;
            }
        };

        let mut filtered = filters::apply(snapshot, &self.geo);
        for controller in &mut filtered.controllers {
            controller.controller_type = self
                .classifier
                .classify(&controller.callsign, controller.facility)
                .kind;
        }

        // In-memory state updates before any open rows are written.
        let events = self.tracker.update(&filtered.flights, &self.geo);
        let interactions =
            proximity::pair(&filtered.flights, &filtered.controllers, &self.classifier);

        // Storage failures are batch-scoped: log, count, carry on.
        if let Err(e) = self.occupancy_repo.apply_events(events).await {
            error!("Failed to persist sector events: {:#}", e);
            metrics::counter!("pipeline.batch_failures", "stage" => "occupancies").increment(1);
        }
        if let Err(e) = self.flights_repo.bulk_upsert(&filtered.flights).await {
            error!("Failed to persist flight samples: {:#}", e);
            metrics::counter!("pipeline.batch_failures", "stage" => "flights").increment(1);
        }
        if let Err(e) = self.controllers_repo.insert_batch(&filtered.controllers).await {
            error!("Failed to persist controller samples: {:#}", e);
            metrics::counter!("pipeline.batch_failures", "stage" => "controllers").increment(1);
        }
        if let Err(e) = self
            .controllers_repo
            .insert_transceivers(&filtered.transceivers)
            .await
        {
            error!("Failed to persist transceiver samples: {:#}", e);
            metrics::counter!("pipeline.batch_failures", "stage" => "transceivers").increment(1);
        }
        if let Err(e) = self.interactions_repo.insert_batch(&interactions).await {
            error!("Failed to persist interactions: {:#}", e);
            metrics::counter!("pipeline.batch_failures", "stage" => "interactions").increment(1);
        }

        // Cleanup is isolated from the loop: a failure retries next tick.
        if let Err(e) = self.cleanup.reconcile(&mut self.tracker).await {
            warn!("Cleanup pass failed, will retry next tick: {}", e);
        }

        metrics::counter!("pipeline.ticks_completed").increment(1);
    }
}

/// Run the summarizer on its own cadence until cancelled. The first pass
/// waits a full interval; `summarize-once` exists for immediate backfills.
pub async fn run_summarizer(summarizer: Summarizer, every: std::time::Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;
    info!("Summarization loop started (every {:?})", every);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Summarization loop stopped");
                return;
            }
            _ = interval.tick() => {
                if let Err(e) = summarizer.run_once().await {
                    warn!("Summarization pass failed, will retry next cycle: {:#}", e);
                    metrics::counter!("summarizer.pass_failures").increment(1);
                }
            }
        }
    }
}
