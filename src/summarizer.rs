//! Flight summarization and archival.
//!
//! On its own cadence, finds flights whose newest sample is older than the
//! completion threshold, folds their per-tick rows into one summary record,
//! moves the raw rows into the archive partition, and enforces retention on
//! the archive. Each flight is one transaction: a partial failure rolls the
//! whole flight back and the next pass retries it.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::db::{PgPool, run_with_retries};
use crate::flights_repo::FlightSamplesRepository;
use crate::interactions_repo::InteractionRow;
use crate::occupancy_repo::SectorOccupancyRow;
use crate::proximity::haversine_nm;
use crate::samples::FlightSampleRow;
use crate::schema::{flight_samples, flight_summaries, interactions, sector_occupancies};

/// One sector visit in a summary, in first-entry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorVisit {
    pub sector_name: String,
    pub minutes: f64,
    pub entered_at: DateTime<Utc>,
}

/// Aggregated contact with one controller callsign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerContact {
    pub controller_type: String,
    pub minutes: f64,
    pub first_contact_at: DateTime<Utc>,
    pub last_contact_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = flight_summaries)]
pub struct NewFlightSummary {
    pub callsign: String,
    pub pilot_id: i64,
    pub departure_icao: String,
    pub arrival_icao: String,
    pub aircraft_type: Option<String>,
    pub total_samples: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub total_distance_nm: f64,
    pub avg_groundspeed_kt: f64,
    pub max_altitude_ft: i32,
    pub sectors_visited: serde_json::Value,
    pub controller_interactions: serde_json::Value,
}

/// Fold a completed flight's rows into its summary record. Samples must be
/// ordered by observed_at ascending. Returns None for an empty flight.
pub fn build_summary(
    callsign: &str,
    pilot_id: i64,
    samples: &[FlightSampleRow],
    occupancies: &[SectorOccupancyRow],
    contacts: &[InteractionRow],
) -> Option<NewFlightSummary> {
    let first = samples.first()?;
    let last = samples.last()?;

    let total_distance_nm = samples
        .windows(2)
        .map(|w| haversine_nm(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
        .sum();

    let speeds: Vec<i32> = samples.iter().filter_map(|s| s.groundspeed_kt).collect();
    let avg_groundspeed_kt = if speeds.is_empty() {
        0.0
    } else {
        speeds.iter().map(|&s| s as f64).sum::<f64>() / speeds.len() as f64
    };
    let max_altitude_ft = samples.iter().map(|s| s.altitude_ft).max().unwrap_or(0);

    // Per-sector minutes, keyed by sector, listed in first-entry order.
    let mut visits: Vec<SectorVisit> = Vec::new();
    for row in occupancies {
        let seconds = row
            .duration_seconds
            .or_else(|| row.exit_at.map(|exit| (exit - row.entry_at).num_seconds()))
            .unwrap_or(0)
            .max(0);
        let minutes = seconds as f64 / 60.0;
        match visits.iter_mut().find(|v| v.sector_name == row.sector_name) {
            Some(visit) => visit.minutes += minutes,
            None => visits.push(SectorVisit {
                sector_name: row.sector_name.clone(),
                minutes,
                entered_at: row.entry_at,
            }),
        }
    }

    // Contact span per controller callsign.
    let mut per_controller: BTreeMap<String, ControllerContact> = BTreeMap::new();
    for row in contacts {
        per_controller
            .entry(row.controller_callsign.clone())
            .and_modify(|c| {
                c.first_contact_at = c.first_contact_at.min(row.observed_at);
                c.last_contact_at = c.last_contact_at.max(row.observed_at);
                c.minutes =
                    (c.last_contact_at - c.first_contact_at).num_seconds() as f64 / 60.0;
            })
            .or_insert_with(|| ControllerContact {
                controller_type: row.controller_type.clone(),
                minutes: 0.0,
                first_contact_at: row.observed_at,
                last_contact_at: row.observed_at,
            });
    }

    Some(NewFlightSummary {
        callsign: callsign.to_string(),
        pilot_id,
        departure_icao: last.departure_icao.clone(),
        arrival_icao: last.arrival_icao.clone(),
        aircraft_type: last.aircraft_type.clone(),
        total_samples: samples.len() as i64,
        first_seen_at: first.observed_at,
        last_seen_at: last.observed_at,
        total_distance_nm,
        avg_groundspeed_kt,
        max_altitude_ft,
        sectors_visited: serde_json::to_value(&visits).unwrap_or(serde_json::Value::Null),
        controller_interactions: serde_json::to_value(&per_controller)
            .unwrap_or(serde_json::Value::Null),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizeOutcome {
    Summarized { archived_rows: usize },
    AlreadySummarized,
    NoSamples,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SummarizeStats {
    pub summarized: usize,
    pub skipped: usize,
    pub archived_rows: usize,
    pub purged_rows: usize,
}

pub struct Summarizer {
    pool: PgPool,
    flights_repo: FlightSamplesRepository,
    completion_threshold: Duration,
    archive_retention: Duration,
    batch_limit: i64,
}

impl Summarizer {
    pub fn new(
        pool: PgPool,
        completion_threshold_hours: i64,
        archive_retention_days: i64,
        batch_limit: i64,
    ) -> Self {
        Self {
            flights_repo: FlightSamplesRepository::new(pool.clone()),
            pool,
            completion_threshold: Duration::hours(completion_threshold_hours),
            archive_retention: Duration::days(archive_retention_days),
            batch_limit,
        }
    }

    /// One summarization pass: a bounded batch of completed flights, then
    /// retention enforcement on the archive.
    pub async fn run_once(&self) -> Result<SummarizeStats> {
        let cutoff = Utc::now() - self.completion_threshold;
        let pairs = self.flights_repo.find_completed(cutoff, self.batch_limit).await?;

        let mut stats = SummarizeStats::default();
        for (callsign, pilot_id) in pairs {
            match self.summarize_flight(&callsign, pilot_id).await {
                Ok(SummarizeOutcome::Summarized { archived_rows }) => {
                    stats.summarized += 1;
                    stats.archived_rows += archived_rows;
                    metrics::counter!("summarizer.flights_summarized").increment(1);
                }
                Ok(SummarizeOutcome::AlreadySummarized) | Ok(SummarizeOutcome::NoSamples) => {
                    stats.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to summarize {}/{}: {}", callsign, pilot_id, e);
                    metrics::counter!("summarizer.failures").increment(1);
                }
            }
        }

        stats.purged_rows = self.purge_archive().await?;

        if stats.summarized > 0 || stats.purged_rows > 0 {
            info!(
                "Summarization pass: {} flights summarized, {} rows archived, {} archive rows purged",
                stats.summarized, stats.archived_rows, stats.purged_rows
            );
        }
        Ok(stats)
    }

    /// Summarize one flight inside a single transaction: aggregate, insert
    /// the summary, copy the raw rows to the archive, delete them from the
    /// live table. Re-running on a summarized flight is a no-op.
    pub async fn summarize_flight(
        &self,
        flight_callsign: &str,
        flight_pilot_id: i64,
    ) -> Result<SummarizeOutcome> {
        let pool = self.pool.clone();
        let flight_callsign = flight_callsign.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            conn.transaction::<SummarizeOutcome, anyhow::Error, _>(|conn| {
                let already: i64 = flight_summaries::table
                    .filter(flight_summaries::callsign.eq(&flight_callsign))
                    .filter(flight_summaries::pilot_id.eq(flight_pilot_id))
                    .count()
                    .get_result(conn)?;
                if already > 0 {
                    debug!(
                        "Flight {}/{} already summarized",
                        flight_callsign, flight_pilot_id
                    );
                    return Ok(SummarizeOutcome::AlreadySummarized);
                }

                let samples = flight_samples::table
                    .filter(flight_samples::callsign.eq(&flight_callsign))
                    .filter(flight_samples::pilot_id.eq(flight_pilot_id))
                    .order(flight_samples::observed_at.asc())
                    .select(FlightSampleRow::as_select())
                    .load::<FlightSampleRow>(conn)?;
                if samples.is_empty() {
                    return Ok(SummarizeOutcome::NoSamples);
                }

                let occupancies = sector_occupancies::table
                    .filter(sector_occupancies::callsign.eq(&flight_callsign))
                    .filter(sector_occupancies::pilot_id.eq(flight_pilot_id))
                    .order(sector_occupancies::entry_at.asc())
                    .select(SectorOccupancyRow::as_select())
                    .load::<SectorOccupancyRow>(conn)?;

                let contacts = interactions::table
                    .filter(interactions::flight_callsign.eq(&flight_callsign))
                    .filter(interactions::flight_pilot_id.eq(flight_pilot_id))
                    .order(interactions::observed_at.asc())
                    .select(InteractionRow::as_select())
                    .load::<InteractionRow>(conn)?;

                let Some(summary) =
                    build_summary(&flight_callsign, flight_pilot_id, &samples, &occupancies, &contacts)
                else {
                    return Ok(SummarizeOutcome::NoSamples);
                };

                let inserted = diesel::insert_into(flight_summaries::table)
                    .values(&summary)
                    .on_conflict((flight_summaries::callsign, flight_summaries::pilot_id))
                    .do_nothing()
                    .execute(conn)?;
                if inserted == 0 {
                    return Ok(SummarizeOutcome::AlreadySummarized);
                }

                // Move the raw rows verbatim, ids included, then delete them.
                let archived = diesel::sql_query(
                    "INSERT INTO flight_samples_archive \
                     (id, callsign, pilot_id, observed_at, latitude, longitude, altitude_ft, \
                      groundspeed_kt, heading_deg, departure_icao, arrival_icao, aircraft_type, \
                      flight_rules, route, created_at) \
                     SELECT id, callsign, pilot_id, observed_at, latitude, longitude, altitude_ft, \
                            groundspeed_kt, heading_deg, departure_icao, arrival_icao, aircraft_type, \
                            flight_rules, route, created_at \
                     FROM flight_samples WHERE callsign = $1 AND pilot_id = $2",
                )
                .bind::<diesel::sql_types::Text, _>(&flight_callsign)
                .bind::<diesel::sql_types::BigInt, _>(flight_pilot_id)
                .execute(conn)?;

                let deleted = diesel::delete(
                    flight_samples::table
                        .filter(flight_samples::callsign.eq(&flight_callsign))
                        .filter(flight_samples::pilot_id.eq(flight_pilot_id)),
                )
                .execute(conn)?;

                if archived != deleted {
                    bail!(
                        "archive moved {archived} rows but deleted {deleted} for \
                         {flight_callsign}/{flight_pilot_id}"
                    );
                }

                Ok(SummarizeOutcome::Summarized {
                    archived_rows: archived,
                })
            })
        })
        .await??;

        Ok(outcome)
    }

    /// Delete archive rows past retention in their own transaction.
    pub async fn purge_archive(&self) -> Result<usize> {
        use crate::schema::flight_samples_archive::dsl::*;

        let pool = self.pool.clone();
        let cutoff = Utc::now() - self.archive_retention;

        let purged = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            run_with_retries("flight_samples_archive.purge", || {
                Ok(diesel::delete(flight_samples_archive.filter(observed_at.lt(cutoff)))
                    .execute(&mut conn)?)
            })
        })
        .await??;

        if purged > 0 {
            metrics::counter!("summarizer.archive_purged").increment(purged as u64);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        chrono::Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
            + Duration::seconds(offset_secs)
    }

    fn sample_row(at: DateTime<Utc>, lat: f64, lon: f64, alt: i32, gs: Option<i32>) -> FlightSampleRow {
        FlightSampleRow {
            id: 0,
            callsign: "NWK4".to_string(),
            pilot_id: 4004,
            observed_at: at,
            latitude: lat,
            longitude: lon,
            altitude_ft: alt,
            groundspeed_kt: gs,
            heading_deg: None,
            departure_icao: "YSSY".to_string(),
            arrival_icao: "YMML".to_string(),
            aircraft_type: Some("SF34".to_string()),
            flight_rules: Some("IFR".to_string()),
            route: None,
            created_at: at,
        }
    }

    fn occupancy_row(sector: &str, entry: DateTime<Utc>, seconds: i64) -> SectorOccupancyRow {
        SectorOccupancyRow {
            id: 0,
            callsign: "NWK4".to_string(),
            pilot_id: 4004,
            sector_name: sector.to_string(),
            entry_at: entry,
            entry_lat: -33.5,
            entry_lon: 151.0,
            entry_altitude_ft: 20_000,
            exit_at: Some(entry + Duration::seconds(seconds)),
            exit_lat: Some(-33.6),
            exit_lon: Some(151.1),
            exit_altitude_ft: Some(20_000),
            duration_seconds: Some(seconds),
            is_active: false,
            created_at: entry,
        }
    }

    fn interaction_row(
        controller: &str,
        kind: &str,
        at: DateTime<Utc>,
    ) -> InteractionRow {
        InteractionRow {
            id: 0,
            flight_callsign: "NWK4".to_string(),
            flight_pilot_id: 4004,
            controller_callsign: controller.to_string(),
            controller_type: kind.to_string(),
            distance_nm: 10.0,
            proximity_nm: 60.0,
            observed_at: at,
        }
    }

    #[test]
    fn test_build_summary_aggregates() {
        // Three samples a minute apart, one degree of latitude covered in
        // two steps of half a degree.
        let samples = vec![
            sample_row(t(0), -33.0, 151.0, 10_000, Some(200)),
            sample_row(t(60), -33.5, 151.0, 20_000, Some(300)),
            sample_row(t(120), -34.0, 151.0, 15_000, None),
        ];
        let occupancies = vec![
            occupancy_row("S_A", t(0), 900),
            occupancy_row("S_B", t(900), 2700),
            occupancy_row("S_A", t(3600), 300),
        ];
        let contacts = vec![
            interaction_row("SY_APP", "approach", t(0)),
            interaction_row("SY_APP", "approach", t(720)),
            interaction_row("ML_CTR", "center", t(1200)),
            interaction_row("ML_CTR", "center", t(3600)),
        ];

        let summary = build_summary("NWK4", 4004, &samples, &occupancies, &contacts).unwrap();

        assert_eq!(summary.callsign, "NWK4");
        assert_eq!(summary.total_samples, 3);
        assert_eq!(summary.first_seen_at, t(0));
        assert_eq!(summary.last_seen_at, t(120));
        assert_eq!(summary.departure_icao, "YSSY");
        assert_eq!(summary.max_altitude_ft, 20_000);
        // Mean of the two known speeds; the missing one is not a zero.
        assert_eq!(summary.avg_groundspeed_kt, 250.0);
        // One degree of latitude is sixty-odd nautical miles.
        assert!((summary.total_distance_nm - 60.0).abs() < 0.2);

        let visits: Vec<SectorVisit> =
            serde_json::from_value(summary.sectors_visited.clone()).unwrap();
        // Two sectors, first-entry order, with the repeat visit to S_A
        // folded in: 15 + 5 minutes and 45 minutes.
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].sector_name, "S_A");
        assert_eq!(visits[0].minutes, 20.0);
        assert_eq!(visits[1].sector_name, "S_B");
        assert_eq!(visits[1].minutes, 45.0);

        let contacts_map: BTreeMap<String, ControllerContact> =
            serde_json::from_value(summary.controller_interactions.clone()).unwrap();
        assert_eq!(contacts_map.len(), 2);
        let app = &contacts_map["SY_APP"];
        assert_eq!(app.controller_type, "approach");
        assert_eq!(app.minutes, 12.0);
        assert_eq!(app.first_contact_at, t(0));
        assert_eq!(app.last_contact_at, t(720));
        let ctr = &contacts_map["ML_CTR"];
        assert_eq!(ctr.minutes, 40.0);
    }

    #[test]
    fn test_build_summary_empty_flight() {
        assert!(build_summary("X", 1, &[], &[], &[]).is_none());
    }

    #[test]
    fn test_build_summary_open_occupancy_counts_zero_minutes() {
        let samples = vec![sample_row(t(0), -33.0, 151.0, 10_000, Some(200))];
        let mut open = occupancy_row("S_A", t(0), 0);
        open.exit_at = None;
        open.duration_seconds = None;
        open.is_active = true;

        let summary = build_summary("NWK4", 4004, &samples, &[open], &[]).unwrap();
        let visits: Vec<SectorVisit> =
            serde_json::from_value(summary.sectors_visited).unwrap();
        assert_eq!(visits[0].minutes, 0.0);
    }

    #[test]
    fn test_single_contact_has_zero_minutes() {
        let samples = vec![sample_row(t(0), -33.0, 151.0, 10_000, Some(200))];
        let contacts = vec![interaction_row("SY_TWR", "tower", t(0))];
        let summary = build_summary("NWK4", 4004, &samples, &[], &contacts).unwrap();
        let map: BTreeMap<String, ControllerContact> =
            serde_json::from_value(summary.controller_interactions).unwrap();
        assert_eq!(map["SY_TWR"].minutes, 0.0);
    }
}
