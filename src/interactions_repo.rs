//! Persistence for aircraft/controller interaction events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::{PgPool, run_with_retries};
use crate::proximity::Interaction;
use crate::schema::interactions;

const BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = interactions)]
struct NewInteraction {
    flight_callsign: String,
    flight_pilot_id: i64,
    controller_callsign: String,
    controller_type: String,
    distance_nm: f64,
    proximity_nm: f64,
    observed_at: DateTime<Utc>,
}

impl From<&Interaction> for NewInteraction {
    fn from(i: &Interaction) -> Self {
        Self {
            flight_callsign: i.flight_callsign.clone(),
            flight_pilot_id: i.flight_pilot_id,
            controller_callsign: i.controller_callsign.clone(),
            controller_type: i.controller_type.as_str().to_string(),
            distance_nm: i.distance_nm,
            proximity_nm: i.proximity_nm,
            observed_at: i.observed_at,
        }
    }
}

/// A stored interaction, as read back by the summarizer.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = interactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InteractionRow {
    pub id: i64,
    pub flight_callsign: String,
    pub flight_pilot_id: i64,
    pub controller_callsign: String,
    pub controller_type: String,
    pub distance_nm: f64,
    pub proximity_nm: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct InteractionsRepository {
    pool: PgPool,
}

impl InteractionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, rows: &[Interaction]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        use crate::schema::interactions::dsl::*;

        let pool = self.pool.clone();
        let new_rows: Vec<NewInteraction> = rows.iter().map(NewInteraction::from).collect();

        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut total = 0usize;
            for chunk in new_rows.chunks(BATCH_SIZE) {
                total += run_with_retries("interactions.insert", || {
                    Ok(diesel::insert_into(interactions)
                        .values(chunk)
                        .execute(&mut conn)?)
                })?;
            }
            Ok::<usize, anyhow::Error>(total)
        })
        .await??;

        metrics::counter!("store.interactions.inserted").increment(inserted as u64);
        Ok(inserted)
    }
}
