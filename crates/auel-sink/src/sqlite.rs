//! Embedded sink backed by SQLite.
//!
//! Behaviorally identical to the server-backed sinks; used as a local
//! store and as the dialect exercised by the test suites.

use std::path::Path;

use async_trait::async_trait;
use auel_core::CanonicalRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::{finish_write, Outcome, SinkConfig, SinkError, SinkWriter};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS app_usage_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER UNIQUE,
    event_name TEXT NOT NULL,
    app_name TEXT NOT NULL,
    org TEXT,
    timestamp TEXT NOT NULL,
    event_data TEXT NOT NULL
)";

pub struct SqliteSink {
    id: String,
    pool: SqlitePool,
}

impl SqliteSink {
    /// Build a sink over a lazy pool; the database file is created on
    /// first use if it does not exist.
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>, config: &SinkConfig) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);
        Self {
            id: id.into(),
            pool,
        }
    }

    async fn try_write(&self, record: &CanonicalRecord) -> Result<Outcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if let Some(source_id) = record.source_id {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM app_usage_events WHERE event_id = ?")
                    .bind(source_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if existing.is_some() {
                return Ok(Outcome::Skipped);
            }
            sqlx::query(
                "INSERT INTO app_usage_events (event_id, event_name, app_name, org, timestamp, event_data) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(source_id)
            .bind(&record.event_name)
            .bind(&record.app_name)
            .bind(record.org.as_deref())
            .bind(record.timestamp)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO app_usage_events (event_name, app_name, org, timestamp, event_data) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.event_name)
            .bind(&record.app_name)
            .bind(record.org.as_deref())
            .bind(record.timestamp)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(Outcome::Success)
    }
}

#[async_trait]
impl SinkWriter for SqliteSink {
    fn sink_id(&self) -> &str {
        &self.id
    }

    async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn write(&self, record: &CanonicalRecord) -> Outcome {
        finish_write(&self.id, record, self.try_write(record).await)
    }
}
