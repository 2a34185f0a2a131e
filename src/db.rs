//! Connection pool construction and the shared database error policy.

use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::time::Duration;
use tracing::warn;

use crate::config::DatabaseConfig;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Per-connection setup: bound every statement so a stuck lock cannot hold a
/// pooled connection indefinitely.
#[derive(Debug)]
struct StatementTimeout {
    timeout_secs: u64,
}

impl diesel::r2d2::CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = '{}s'", self.timeout_secs))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn build_pool(database_url: &str, cfg: &DatabaseConfig) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(cfg.pool_size)
        .connection_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .max_lifetime(Some(Duration::from_secs(cfg.recycle_secs)))
        .connection_customizer(Box::new(StatementTimeout {
            timeout_secs: cfg.statement_timeout_secs,
        }))
        .build(manager)
        .context("failed to build database connection pool")?;
    Ok(pool)
}

/// Check connectivity once. Called at startup, where an unreachable database
/// is fatal.
pub fn verify_connectivity(pool: &PgPool) -> Result<()> {
    let mut conn = pool.get().context("database is unreachable")?;
    conn.batch_execute("SELECT 1")
        .context("database connectivity check failed")?;
    Ok(())
}

/// Whether an error is worth retrying: connection loss, serialization
/// failure, pool acquire timeout. Constraint violations and schema
/// mismatches are not.
pub fn is_transient_db_error(err: &anyhow::Error) -> bool {
    if let Some(diesel_err) = err.downcast_ref::<diesel::result::Error>() {
        use diesel::result::DatabaseErrorKind;
        use diesel::result::Error;
        return match diesel_err {
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _)
            | Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
            | Error::DatabaseError(DatabaseErrorKind::UnableToSendCommand, _)
            | Error::BrokenTransactionManager => true,
            _ => false,
        };
    }
    err.downcast_ref::<r2d2::Error>().is_some()
}

/// Run a database batch with bounded retries on transient failures. Used
/// inside blocking sections; a failed batch is reported, never escalated
/// into a tick abort by callers.
pub fn run_with_retries<T>(
    operation: &str,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    const ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_millis(200);
    let mut last_err = None;

    for attempt in 1..=ATTEMPTS {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < ATTEMPTS && is_transient_db_error(&e) => {
                warn!(
                    "Transient database error in {} (attempt {}/{}): {}",
                    operation, attempt, ATTEMPTS, e
                );
                metrics::counter!("db.retries", "operation" => operation.to_string()).increment(1);
                std::thread::sleep(delay);
                delay *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{operation}: retries exhausted")))
}
