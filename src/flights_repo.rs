//! Persistence for live flight samples.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, trace};

use crate::db::{PgPool, run_with_retries};
use crate::samples::{FlightSample, NewFlightSample};

/// Rows per transaction for bulk writes. Bounded so each transaction's lock
/// hold stays small.
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct FlightSamplesRepository {
    pool: PgPool,
    batch_size: usize,
}

impl FlightSamplesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Append-style upsert. Uniqueness is (callsign, pilot_id, observed_at);
    /// replaying a snapshot inserts nothing new. Each batch is one
    /// transaction; a batch that keeps failing is skipped by the caller, not
    /// retried across ticks.
    pub async fn bulk_upsert(&self, samples: &[FlightSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        use crate::schema::flight_samples::dsl::*;

        let pool = self.pool.clone();
        let batch_size = self.batch_size;
        let rows: Vec<NewFlightSample> = samples.iter().map(NewFlightSample::from).collect();

        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut total = 0usize;
            for chunk in rows.chunks(batch_size) {
                let written = run_with_retries("flight_samples.bulk_upsert", || {
                    let count = conn.transaction::<usize, anyhow::Error, _>(|conn| {
                        Ok(diesel::insert_into(flight_samples)
                            .values(chunk)
                            .on_conflict((callsign, pilot_id, observed_at))
                            .do_nothing()
                            .execute(conn)?)
                    })?;
                    Ok(count)
                })?;
                total += written;
            }
            Ok::<usize, anyhow::Error>(total)
        })
        .await??;

        metrics::counter!("store.flight_samples.inserted").increment(inserted as u64);
        if inserted < samples.len() {
            trace!(
                "Upsert skipped {} duplicate flight samples",
                samples.len() - inserted
            );
        }
        Ok(inserted)
    }

    /// Distinct (callsign, pilot_id) pairs whose newest sample is older than
    /// `completion_cutoff`, bounded to `limit` pairs per pass.
    pub async fn find_completed(
        &self,
        completion_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(String, i64)>> {
        use crate::schema::flight_samples::dsl::*;

        let pool = self.pool.clone();

        let pairs = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let pairs = flight_samples
                .group_by((callsign, pilot_id))
                .having(diesel::dsl::max(observed_at).lt(completion_cutoff))
                .select((callsign, pilot_id))
                .order((callsign.asc(), pilot_id.asc()))
                .limit(limit)
                .load::<(String, i64)>(&mut conn)?;
            Ok::<Vec<(String, i64)>, anyhow::Error>(pairs)
        })
        .await??;

        debug!("Found {} completed flights", pairs.len());
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::PgConnection;
    use diesel::r2d2::{ConnectionManager, Pool};
    use serial_test::serial;

    // Repository behavior against a live schema runs only where a test
    // database is provided.
    fn create_test_pool() -> Result<PgPool> {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/skywatch_test".to_string());
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(2).build(manager)?;
        Ok(pool)
    }

    #[tokio::test]
    #[serial]
    async fn test_repository_construction() {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            return;
        }
        if let Ok(pool) = create_test_pool() {
            let repo = FlightSamplesRepository::new(pool);
            assert_eq!(repo.batch_size, DEFAULT_BATCH_SIZE);
        }
    }
}
