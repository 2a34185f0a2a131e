//! Post-tick reconciliation of silent aircraft.
//!
//! Aircraft disconnect without a clean exit; without this pass their open
//! sectors would accumulate forever and skew summaries. Runs after every
//! successful pipeline tick and must never abort the ingestion loop.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::occupancy_repo::SectorOccupancyRepository;
use crate::sector_tracker::{AircraftKey, SectorTracker};

pub struct Cleanup {
    occupancies: SectorOccupancyRepository,
    timeout: Duration,
}

impl Cleanup {
    pub fn new(occupancies: SectorOccupancyRepository, timeout_secs: i64) -> Self {
        Self {
            occupancies,
            timeout: Duration::seconds(timeout_secs),
        }
    }

    /// Close all open sectors of aircraft with no sample since the staleness
    /// cutoff, using their last known position and sighting time, then evict
    /// them from the tracker. Per-aircraft failures are logged and retried
    /// on the next tick.
    pub async fn reconcile(&self, tracker: &mut SectorTracker) -> Result<usize> {
        let cutoff = Utc::now() - self.timeout;
        let stale = self.occupancies.find_stale_aircraft(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut closed_rows = 0usize;
        for aircraft in stale {
            match self
                .occupancies
                .close_all_open_for(
                    &aircraft.callsign,
                    aircraft.pilot_id,
                    aircraft.last_seen_at,
                    aircraft.last_lat,
                    aircraft.last_lon,
                    aircraft.last_altitude_ft,
                )
                .await
            {
                Ok(count) => {
                    closed_rows += count;
                    let key = AircraftKey::new(aircraft.callsign.clone(), aircraft.pilot_id);
                    tracker.remove(&key);
                    metrics::counter!("cleanup.aircraft_reconciled").increment(1);
                }
                Err(e) => {
                    warn!(
                        "Failed to close stale sectors for {}/{}: {}",
                        aircraft.callsign, aircraft.pilot_id, e
                    );
                    metrics::counter!("cleanup.failures").increment(1);
                }
            }
        }

        if closed_rows > 0 {
            info!("Cleanup closed {} stale occupancy rows", closed_rows);
        }
        Ok(closed_rows)
    }
}
