//! Postgres backend: connection pool, migrations, and health check.
//!
//! One pool backs the submission store, the ticket store and the pgmq
//! dispatch queue.

pub mod pgmq;
pub mod submission;
pub mod ticket;

pub use pgmq::PgmqQueue;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique-constraint violation on `client_reference` to the domain
/// error, passing everything else through.
pub(crate) fn map_unique_violation(err: sqlx::Error, reference: &str) -> crate::error::Error {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            crate::error::Error::DuplicateReference(reference.to_string())
        }
        other => other.into(),
    }
}
