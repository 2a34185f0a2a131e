//! Persistence for sector occupancy intervals.
//!
//! Entries are inserted with `is_active = true` the tick they open; exits
//! update the same row in place. The database stays authoritative: on
//! startup the tracker reseeds from whatever rows are still active.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, warn};

use crate::db::{PgPool, run_with_retries};
use crate::schema::sector_occupancies;
use crate::sector_tracker::{SectorEvent, SeedRow};

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sector_occupancies)]
struct NewSectorOccupancy {
    callsign: String,
    pilot_id: i64,
    sector_name: String,
    entry_at: DateTime<Utc>,
    entry_lat: f64,
    entry_lon: f64,
    entry_altitude_ft: i32,
    is_active: bool,
}

/// A stored occupancy interval, as read back by the summarizer.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sector_occupancies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SectorOccupancyRow {
    pub id: i64,
    pub callsign: String,
    pub pilot_id: i64,
    pub sector_name: String,
    pub entry_at: DateTime<Utc>,
    pub entry_lat: f64,
    pub entry_lon: f64,
    pub entry_altitude_ft: i32,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_lat: Option<f64>,
    pub exit_lon: Option<f64>,
    pub exit_altitude_ft: Option<i32>,
    pub duration_seconds: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An aircraft with open sectors and no recent samples, as found by the
/// cleanup pass.
#[derive(Debug, Clone)]
pub struct StaleAircraft {
    pub callsign: String,
    pub pilot_id: i64,
    pub last_seen_at: DateTime<Utc>,
    pub last_lat: f64,
    pub last_lon: f64,
    pub last_altitude_ft: i32,
}

#[derive(Clone)]
pub struct SectorOccupancyRepository {
    pool: PgPool,
}

impl SectorOccupancyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply one tick's worth of tracker events: batch-insert the entries,
    /// then close exited rows keyed on (callsign, pilot_id, sector, entry_at).
    pub async fn apply_events(&self, events: Vec<SectorEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        use crate::schema::sector_occupancies::dsl::*;

        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut opens = Vec::new();
            let mut closes = Vec::new();
            for event in events {
                match event {
                    SectorEvent::Entered {
                        callsign: ev_callsign,
                        pilot_id: ev_pilot_id,
                        sector_name: ev_sector,
                        entry_at: ev_entry_at,
                        entry_lat: ev_lat,
                        entry_lon: ev_lon,
                        entry_altitude_ft: ev_alt,
                    } => opens.push(NewSectorOccupancy {
                        callsign: ev_callsign,
                        pilot_id: ev_pilot_id,
                        sector_name: ev_sector,
                        entry_at: ev_entry_at,
                        entry_lat: ev_lat,
                        entry_lon: ev_lon,
                        entry_altitude_ft: ev_alt,
                        is_active: true,
                    }),
                    SectorEvent::Exited { .. } => closes.push(event),
                }
            }

            if !opens.is_empty() {
                let count = opens.len();
                run_with_retries("sector_occupancies.open", || {
                    Ok(diesel::insert_into(sector_occupancies)
                        .values(&opens)
                        .execute(&mut conn)?)
                })?;
                metrics::counter!("store.sector_occupancies.opened").increment(count as u64);
            }

            for event in closes {
                let SectorEvent::Exited {
                    callsign: ev_callsign,
                    pilot_id: ev_pilot_id,
                    sector_name: ev_sector,
                    entry_at: ev_entry_at,
                    exit_at: ev_exit_at,
                    exit_lat: ev_lat,
                    exit_lon: ev_lon,
                    exit_altitude_ft: ev_alt,
                    duration_seconds: ev_duration,
                } = event
                else {
                    continue;
                };
                let updated = run_with_retries("sector_occupancies.close", || {
                    Ok(diesel::update(
                        sector_occupancies
                            .filter(callsign.eq(&ev_callsign))
                            .filter(pilot_id.eq(ev_pilot_id))
                            .filter(sector_name.eq(&ev_sector))
                            .filter(entry_at.eq(ev_entry_at))
                            .filter(is_active.eq(true)),
                    )
                    .set((
                        exit_at.eq(Some(ev_exit_at)),
                        exit_lat.eq(Some(ev_lat)),
                        exit_lon.eq(Some(ev_lon)),
                        exit_altitude_ft.eq(Some(ev_alt)),
                        duration_seconds.eq(Some(ev_duration)),
                        is_active.eq(false),
                    ))
                    .execute(&mut conn)?)
                })?;
                if updated == 0 {
                    warn!(
                        "No open occupancy row matched close of {}/{} in {:?} (entered {})",
                        ev_callsign, ev_pilot_id, ev_sector, ev_entry_at
                    );
                    metrics::counter!("store.sector_occupancies.close_missed").increment(1);
                } else {
                    metrics::counter!("store.sector_occupancies.closed").increment(1);
                }
            }

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    /// All rows still marked active, for tracker seeding at startup.
    pub async fn load_active(&self) -> Result<Vec<SeedRow>> {
        use crate::schema::sector_occupancies::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = sector_occupancies
                .filter(is_active.eq(true))
                .order((callsign.asc(), pilot_id.asc(), sector_name.asc(), entry_at.asc()))
                .select(SectorOccupancyRow::as_select())
                .load::<SectorOccupancyRow>(&mut conn)?;
            Ok::<Vec<SectorOccupancyRow>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows
            .into_iter()
            .map(|r| SeedRow {
                row_id: r.id,
                callsign: r.callsign,
                pilot_id: r.pilot_id,
                sector_name: r.sector_name,
                entry_at: r.entry_at,
                entry_lat: r.entry_lat,
                entry_lon: r.entry_lon,
                entry_altitude_ft: r.entry_altitude_ft,
            })
            .collect())
    }

    /// Close one surplus row found during seeding. The row exits where and
    /// when it entered; it should never have been open.
    pub async fn close_surplus_row(&self, row_id: i64) -> Result<()> {
        use crate::schema::sector_occupancies::dsl::*;

        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::update(sector_occupancies.filter(id.eq(row_id)))
                .set((
                    exit_at.eq(entry_at.nullable()),
                    exit_lat.eq(entry_lat.nullable()),
                    exit_lon.eq(entry_lon.nullable()),
                    exit_altitude_ft.eq(entry_altitude_ft.nullable()),
                    duration_seconds.eq(Some(0i64)),
                    is_active.eq(false),
                ))
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    /// Aircraft that still hold open sectors but have produced no sample
    /// since `older_than`. The last stored sample supplies the exit
    /// position; an aircraft with no samples at all falls back to its
    /// newest open row's entry.
    pub async fn find_stale_aircraft(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<StaleAircraft>> {
        use crate::schema::flight_samples;
        use crate::schema::sector_occupancies::dsl::*;

        let pool = self.pool.clone();

        let stale = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let candidates = sector_occupancies
                .filter(is_active.eq(true))
                .select((callsign, pilot_id))
                .distinct()
                .load::<(String, i64)>(&mut conn)?;

            let mut stale = Vec::new();
            for (candidate_callsign, candidate_pilot_id) in candidates {
                let latest = flight_samples::table
                    .filter(flight_samples::callsign.eq(&candidate_callsign))
                    .filter(flight_samples::pilot_id.eq(candidate_pilot_id))
                    .order(flight_samples::observed_at.desc())
                    .select((
                        flight_samples::observed_at,
                        flight_samples::latitude,
                        flight_samples::longitude,
                        flight_samples::altitude_ft,
                    ))
                    .first::<(DateTime<Utc>, f64, f64, i32)>(&mut conn)
                    .optional()?;

                let (last_seen_at, last_lat, last_lon, last_altitude_ft) = match latest {
                    Some(row) => row,
                    None => {
                        // No live samples left (archived or never stored):
                        // fall back to the newest open row's entry.
                        let fallback = sector_occupancies
                            .filter(callsign.eq(&candidate_callsign))
                            .filter(pilot_id.eq(candidate_pilot_id))
                            .filter(is_active.eq(true))
                            .order(entry_at.desc())
                            .select((entry_at, entry_lat, entry_lon, entry_altitude_ft))
                            .first::<(DateTime<Utc>, f64, f64, i32)>(&mut conn)
                            .optional()?;
                        match fallback {
                            Some(row) => row,
                            None => continue,
                        }
                    }
                };

                if last_seen_at < older_than {
                    stale.push(StaleAircraft {
                        callsign: candidate_callsign,
                        pilot_id: candidate_pilot_id,
                        last_seen_at,
                        last_lat,
                        last_lon,
                        last_altitude_ft,
                    });
                }
            }

            Ok::<Vec<StaleAircraft>, anyhow::Error>(stale)
        })
        .await??;

        Ok(stale)
    }

    /// Close every open sector for one aircraft in a single transaction.
    /// Used by the cleanup pass; the exit timestamp is the aircraft's last
    /// known sighting, so durations are computed per row in SQL.
    pub async fn close_all_open_for(
        &self,
        aircraft_callsign: &str,
        aircraft_pilot_id: i64,
        last_seen_at: DateTime<Utc>,
        last_lat: f64,
        last_lon: f64,
        last_altitude_ft: i32,
    ) -> Result<usize> {
        use crate::schema::sector_occupancies::dsl::*;
        use diesel::sql_types::{BigInt, Timestamptz};

        let pool = self.pool.clone();
        let owned_callsign = aircraft_callsign.to_string();

        let closed = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let closed = conn.transaction::<usize, anyhow::Error, _>(|conn| {
                let duration_expr = diesel::dsl::sql::<BigInt>("GREATEST(0, EXTRACT(EPOCH FROM (")
                    .bind::<Timestamptz, _>(last_seen_at)
                    .sql(" - entry_at))::bigint)");
                Ok(diesel::update(
                    sector_occupancies
                        .filter(callsign.eq(&owned_callsign))
                        .filter(pilot_id.eq(aircraft_pilot_id))
                        .filter(is_active.eq(true)),
                )
                .set((
                    exit_at.eq(Some(last_seen_at)),
                    exit_lat.eq(Some(last_lat)),
                    exit_lon.eq(Some(last_lon)),
                    exit_altitude_ft.eq(Some(last_altitude_ft)),
                    duration_seconds.eq(duration_expr.nullable()),
                    is_active.eq(false),
                ))
                .execute(conn)?)
            })?;
            Ok::<usize, anyhow::Error>(closed)
        })
        .await??;

        if closed > 0 {
            debug!(
                "Closed {} stale occupancy rows for {}/{}",
                closed, aircraft_callsign, aircraft_pilot_id
            );
            metrics::counter!("store.sector_occupancies.stale_closed").increment(closed as u64);
        }
        Ok(closed)
    }
}
