//! Persistence for controller and transceiver samples.
//!
//! Both tables are append-only. Duplicate controller callsigns at the same
//! timestamp are permitted; there is no uniqueness constraint beyond the
//! surrogate key.

use anyhow::Result;
use diesel::RunQueryDsl;
use tracing::trace;

use crate::db::{PgPool, run_with_retries};
use crate::samples::{
    ControllerSample, NewControllerSample, NewTransceiverSample, TransceiverSample,
};

const BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct ControllerSamplesRepository {
    pool: PgPool,
}

impl ControllerSamplesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, samples: &[ControllerSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        use crate::schema::controller_samples::dsl::*;

        let pool = self.pool.clone();
        let rows: Vec<NewControllerSample> = samples.iter().map(NewControllerSample::from).collect();

        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut total = 0usize;
            for chunk in rows.chunks(BATCH_SIZE) {
                total += run_with_retries("controller_samples.insert", || {
                    Ok(diesel::insert_into(controller_samples)
                        .values(chunk)
                        .execute(&mut conn)?)
                })?;
            }
            Ok::<usize, anyhow::Error>(total)
        })
        .await??;

        metrics::counter!("store.controller_samples.inserted").increment(inserted as u64);
        trace!("Inserted {} controller samples", inserted);
        Ok(inserted)
    }

    pub async fn insert_transceivers(&self, samples: &[TransceiverSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        use crate::schema::transceiver_samples::dsl::*;

        let pool = self.pool.clone();
        let rows: Vec<NewTransceiverSample> =
            samples.iter().map(NewTransceiverSample::from).collect();

        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut total = 0usize;
            for chunk in rows.chunks(BATCH_SIZE) {
                total += run_with_retries("transceiver_samples.insert", || {
                    Ok(diesel::insert_into(transceiver_samples)
                        .values(chunk)
                        .execute(&mut conn)?)
                })?;
            }
            Ok::<usize, anyhow::Error>(total)
        })
        .await??;

        metrics::counter!("store.transceiver_samples.inserted").increment(inserted as u64);
        Ok(inserted)
    }
}
