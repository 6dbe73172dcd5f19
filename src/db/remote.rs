//! Remote sync target.
//!
//! The remote tables mirror the local ones without `id`/`synced`; the
//! remote side is not itself sync-tracked.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use thiserror::Error;

use super::models::{SecuritySummary, TelemetrySample};

/// Rows per INSERT statement, well under the Postgres bind limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

/// Batch writer the sync worker drains into.
///
/// Each call is all-or-nothing: on `Err` none of the batch may be
/// considered stored.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert_telemetry(&self, batch: &[TelemetrySample]) -> Result<(), RemoteError>;

    async fn insert_security_summaries(&self, batch: &[SecuritySummary]) -> Result<(), RemoteError>;
}

/// Postgres-backed remote store.
pub struct PgRemoteStore {
    pool: PgPool,
}

impl PgRemoteStore {
    /// Build a lazily-connecting pool; no network I/O happens until the
    /// first batch is written.
    pub fn connect_lazy(url: &str) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Create the remote tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), RemoteError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS env_data (
                timestamp TIMESTAMPTZ NOT NULL,
                temperature DOUBLE PRECISION NOT NULL,
                humidity DOUBLE PRECISION NOT NULL,
                pressure DOUBLE PRECISION NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS security_data (
                timestamp TIMESTAMPTZ NOT NULL,
                motion_count BIGINT NOT NULL DEFAULT 0,
                smoke_count BIGINT NOT NULL DEFAULT 0,
                sound_count BIGINT NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn check_open(&self) -> Result<(), RemoteError> {
        if self.pool.is_closed() {
            return Err(RemoteError::Unavailable("connection pool closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn insert_telemetry(&self, batch: &[TelemetrySample]) -> Result<(), RemoteError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_open()?;

        let mut tx = self.pool.begin().await?;
        for chunk in batch.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO env_data (timestamp, temperature, humidity, pressure) ");
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(s.timestamp)
                    .push_bind(s.temperature)
                    .push_bind(s.humidity)
                    .push_bind(s.pressure);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_security_summaries(&self, batch: &[SecuritySummary]) -> Result<(), RemoteError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_open()?;

        let mut tx = self.pool.begin().await?;
        for chunk in batch.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO security_data (timestamp, motion_count, smoke_count, sound_count) ",
            );
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(s.timestamp)
                    .push_bind(s.motion_count)
                    .push_bind(s.smoke_count)
                    .push_bind(s.sound_count);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
