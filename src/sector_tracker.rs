//! Per-aircraft sector occupancy state machine.
//!
//! The tracker owns the only process-local mutable state in the service: a
//! map from (callsign, pilot_id) to the set of sectors that aircraft is
//! currently inside. It is touched solely by the ingestion loop, so no
//! locking is needed. Database writes are expressed as `SectorEvent`s the
//! pipeline applies after each update, which keeps this module pure and
//! keeps the occupancy table authoritative across restarts.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::geo::GeoIndex;
use crate::samples::FlightSample;

/// Minimum groundspeed to admit a sector entry, inclusive.
pub const ENTRY_MIN_GROUNDSPEED_KT: i32 = 60;

/// Below this speed an aircraft is considered to have stopped flying.
const TAXI_GROUNDSPEED_KT: i32 = 30;

/// Consecutive below-taxi-speed ticks before an open sector is closed.
const TAXI_TICKS_TO_CLOSE: u32 = 2;

/// Composite aircraft identity. Callsigns are reused across the network;
/// the pilot id disambiguates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AircraftKey {
    pub callsign: String,
    pub pilot_id: i64,
}

impl AircraftKey {
    pub fn new(callsign: impl Into<String>, pilot_id: i64) -> Self {
        Self {
            callsign: callsign.into(),
            pilot_id,
        }
    }
}

impl std::fmt::Display for AircraftKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.callsign, self.pilot_id)
    }
}

#[derive(Debug, Clone)]
struct OpenSector {
    entry_at: DateTime<Utc>,
    entry_lat: f64,
    entry_lon: f64,
    entry_altitude_ft: i32,
    below_taxi_ticks: u32,
}

/// In-memory state for one tracked aircraft.
#[derive(Debug, Clone)]
pub struct AircraftState {
    // BTreeMap keeps sector iteration deterministic by name.
    open_sectors: BTreeMap<String, OpenSector>,
    pub last_seen_at: DateTime<Utc>,
    pub last_lat: f64,
    pub last_lon: f64,
    pub last_altitude_ft: i32,
    pub last_groundspeed_kt: Option<i32>,
}

impl AircraftState {
    fn from_sample(sample: &FlightSample) -> Self {
        Self {
            open_sectors: BTreeMap::new(),
            last_seen_at: sample.observed_at,
            last_lat: sample.latitude,
            last_lon: sample.longitude,
            last_altitude_ft: sample.altitude_ft,
            last_groundspeed_kt: sample.groundspeed_kt,
        }
    }

    pub fn open_sector_names(&self) -> Vec<&str> {
        self.open_sectors.keys().map(String::as_str).collect()
    }
}

/// An occupancy change to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum SectorEvent {
    Entered {
        callsign: String,
        pilot_id: i64,
        sector_name: String,
        entry_at: DateTime<Utc>,
        entry_lat: f64,
        entry_lon: f64,
        entry_altitude_ft: i32,
    },
    Exited {
        callsign: String,
        pilot_id: i64,
        sector_name: String,
        entry_at: DateTime<Utc>,
        exit_at: DateTime<Utc>,
        exit_lat: f64,
        exit_lon: f64,
        exit_altitude_ft: i32,
        duration_seconds: i64,
    },
}

/// A row restored from storage at startup.
#[derive(Debug, Clone)]
pub struct SeedRow {
    pub row_id: i64,
    pub callsign: String,
    pub pilot_id: i64,
    pub sector_name: String,
    pub entry_at: DateTime<Utc>,
    pub entry_lat: f64,
    pub entry_lon: f64,
    pub entry_altitude_ft: i32,
}

#[derive(Debug, Default)]
pub struct SectorTracker {
    states: HashMap<AircraftKey, AircraftState>,
}

impl SectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    pub fn open_sector_count(&self) -> usize {
        self.states.values().map(|s| s.open_sectors.len()).sum()
    }

    pub fn aircraft(&self, key: &AircraftKey) -> Option<&AircraftState> {
        self.states.get(key)
    }

    /// Drop an aircraft from the map. Used by cleanup once its open sectors
    /// have been closed in storage.
    pub fn remove(&mut self, key: &AircraftKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Rebuild open-sector state from rows that were active at shutdown.
    ///
    /// At most one open row per (callsign, pilot_id, sector) may exist; if
    /// storage disagrees, the earliest row wins and the ids of the rest are
    /// returned so the caller can close them.
    pub fn seed(&mut self, mut rows: Vec<SeedRow>) -> Vec<i64> {
        rows.sort_by(|a, b| {
            (&a.callsign, a.pilot_id, &a.sector_name, a.entry_at, a.row_id).cmp(&(
                &b.callsign,
                b.pilot_id,
                &b.sector_name,
                b.entry_at,
                b.row_id,
            ))
        });

        let mut surplus = Vec::new();
        let mut kept: Vec<SeedRow> = Vec::new();
        for row in rows {
            let duplicate = kept.last().is_some_and(|prev| {
                prev.callsign == row.callsign
                    && prev.pilot_id == row.pilot_id
                    && prev.sector_name == row.sector_name
            });
            if duplicate {
                warn!(
                    "Duplicate open occupancy for {}/{} in {:?}, closing row {}",
                    row.callsign, row.pilot_id, row.sector_name, row.row_id
                );
                metrics::counter!("sector_tracker.duplicate_open_rows").increment(1);
                surplus.push(row.row_id);
                continue;
            }
            kept.push(row);
        }

        for row in kept {
            let key = AircraftKey::new(row.callsign.clone(), row.pilot_id);
            let state = self
                .states
                .entry(key)
                .or_insert_with(|| AircraftState {
                    open_sectors: BTreeMap::new(),
                    last_seen_at: row.entry_at,
                    last_lat: row.entry_lat,
                    last_lon: row.entry_lon,
                    last_altitude_ft: row.entry_altitude_ft,
                    last_groundspeed_kt: None,
                });
            state.last_seen_at = state.last_seen_at.max(row.entry_at);
            state.open_sectors.insert(
                row.sector_name,
                OpenSector {
                    entry_at: row.entry_at,
                    entry_lat: row.entry_lat,
                    entry_lon: row.entry_lon,
                    entry_altitude_ft: row.entry_altitude_ft,
                    below_taxi_ticks: 0,
                },
            );
        }
        surplus
    }

    /// Process one tick of accepted flight samples, returning the occupancy
    /// changes to persist.
    pub fn update(&mut self, flights: &[FlightSample], geo: &GeoIndex) -> Vec<SectorEvent> {
        let mut events = Vec::new();
        for sample in flights {
            self.update_one(sample, geo, &mut events);
        }
        metrics::gauge!("sector_tracker.tracked_aircraft").set(self.tracked_count() as f64);
        metrics::gauge!("sector_tracker.open_sectors").set(self.open_sector_count() as f64);
        events
    }

    fn update_one(&mut self, sample: &FlightSample, geo: &GeoIndex, events: &mut Vec<SectorEvent>) {
        let key = AircraftKey::new(sample.callsign.clone(), sample.pilot_id);
        let state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| AircraftState::from_sample(sample));

        // Footprint-only membership decides exits: altitude drift inside a
        // sector must not close it. The altitude band only gates entries.
        let footprint: HashSet<&str> = geo
            .sectors_containing(sample.latitude, sample.longitude)
            .into_iter()
            .collect();
        let prev: Vec<String> = state.open_sectors.keys().cloned().collect();
        let gs = sample.groundspeed_kt;

        // Geometric exits.
        for sector_name in &prev {
            if !footprint.contains(sector_name.as_str())
                && let Some(open) = state.open_sectors.remove(sector_name)
            {
                events.push(close_event(&key, sector_name, &open, sample));
            }
        }

        // Still inside: maintain the below-taxi-speed counter and close
        // sectors the aircraft has effectively stopped in.
        for sector_name in &prev {
            let stopped = match state.open_sectors.get_mut(sector_name) {
                Some(open) => {
                    match gs {
                        Some(speed) if speed < TAXI_GROUNDSPEED_KT => open.below_taxi_ticks += 1,
                        _ => open.below_taxi_ticks = 0,
                    }
                    open.below_taxi_ticks >= TAXI_TICKS_TO_CLOSE
                }
                None => false,
            };
            if stopped && let Some(open) = state.open_sectors.remove(sector_name) {
                debug!("Speed-gated close of {:?} for {}", sector_name, key);
                events.push(close_event(&key, sector_name, &open, sample));
            }
        }

        // Candidate entries, in deterministic sector-name order. A sector
        // closed earlier this tick was still in `prev`, so re-entry waits
        // for the next tick. Missing groundspeed defers the decision.
        let admissible = geo.sectors_at(sample.latitude, sample.longitude, sample.altitude_ft);
        for sector_name in admissible {
            if prev.iter().any(|p| p == sector_name) {
                continue;
            }
            match gs {
                Some(speed) if speed >= ENTRY_MIN_GROUNDSPEED_KT => {
                    state.open_sectors.insert(
                        sector_name.to_string(),
                        OpenSector {
                            entry_at: sample.observed_at,
                            entry_lat: sample.latitude,
                            entry_lon: sample.longitude,
                            entry_altitude_ft: sample.altitude_ft,
                            below_taxi_ticks: 0,
                        },
                    );
                    events.push(SectorEvent::Entered {
                        callsign: key.callsign.clone(),
                        pilot_id: key.pilot_id,
                        sector_name: sector_name.to_string(),
                        entry_at: sample.observed_at,
                        entry_lat: sample.latitude,
                        entry_lon: sample.longitude,
                        entry_altitude_ft: sample.altitude_ft,
                    });
                }
                _ => {
                    // Too slow, or speed unknown this tick.
                }
            }
        }

        state.last_seen_at = sample.observed_at;
        state.last_lat = sample.latitude;
        state.last_lon = sample.longitude;
        state.last_altitude_ft = sample.altitude_ft;
        state.last_groundspeed_kt = gs;
    }
}

fn close_event(
    key: &AircraftKey,
    sector_name: &str,
    open: &OpenSector,
    sample: &FlightSample,
) -> SectorEvent {
    let duration_seconds = (sample.observed_at - open.entry_at).num_seconds().max(0);
    SectorEvent::Exited {
        callsign: key.callsign.clone(),
        pilot_id: key.pilot_id,
        sector_name: sector_name.to_string(),
        entry_at: open.entry_at,
        exit_at: sample.observed_at,
        exit_lat: sample.latitude,
        exit_lon: sample.longitude,
        exit_altitude_ft: sample.altitude_ft,
        duration_seconds,
    }
}
