//! Local sink backed by MariaDB/MySQL.

use async_trait::async_trait;
use auel_core::CanonicalRecord;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use crate::{finish_write, Outcome, SinkConfig, SinkError, SinkWriter};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS app_usage_events (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    event_id BIGINT UNIQUE,
    event_name VARCHAR(255) NOT NULL,
    app_name VARCHAR(255) NOT NULL,
    org VARCHAR(255),
    timestamp DATETIME NOT NULL,
    event_data TEXT NOT NULL
)";

pub struct MySqlSink {
    id: String,
    pool: MySqlPool,
}

impl MySqlSink {
    /// Build a sink over a lazy pool. No I/O happens here; connectivity
    /// problems surface per write as `Failure(Connectivity)`.
    pub fn new(id: impl Into<String>, url: &str, config: &SinkConfig) -> Result<Self, SinkError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy(url)
            .map_err(|err| SinkError::Configuration(err.to_string()))?;
        Ok(Self {
            id: id.into(),
            pool,
        })
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
impl SinkWriter for MySqlSink {
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
