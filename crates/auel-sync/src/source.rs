//! Read-only view over Home Assistant's internal SQLite event store.

use std::path::Path;

use anyhow::{bail, Context, Result};
use auel_core::RawEvent;
use chrono::{DateTime, Local, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::warn;

/// One historical event read from the source store.
#[derive(Debug, Clone)]
pub struct HistoricalEvent {
    /// Stable per-event identifier; becomes the idempotency key.
    pub source_id: i64,
    /// When the event was fired, as naive local time.
    pub occurred_at: NaiveDateTime,
    pub raw: RawEvent,
}

pub struct HaEventStore {
    pool: SqlitePool,
}

impl HaEventStore {
    /// Open the database file read-only; a missing file is a startup error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("source database not found at {}", path.display());
        }
        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }

    /// All events of `event_type`, ordered by occurrence time, oldest
    /// first. Rows whose payload fails to parse are skipped with a warning
    /// rather than aborting the fetch.
    pub async fn fetch_events(&self, event_type: &str) -> Result<Vec<HistoricalEvent>> {
        let rows = sqlx::query(
            "SELECT e.event_id, e.time_fired_ts, ed.shared_data \
             FROM events e \
             INNER JOIN event_data ed ON e.data_id = ed.data_id \
             INNER JOIN event_types et ON e.event_type_id = et.event_type_id \
             WHERE et.event_type = ? \
             ORDER BY e.time_fired_ts ASC",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .context("querying historical events")?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let source_id: i64 = row.try_get("event_id")?;
            // time_fired_ts is microseconds since the Unix epoch.
            let fired_micros: f64 = row.try_get("time_fired_ts")?;
            let Some(occurred_at) = DateTime::from_timestamp_micros(fired_micros as i64)
                .map(|utc| utc.with_timezone(&Local).naive_local())
            else {
                warn!(source_id, fired_micros, "skipping event with out-of-range fire time");
                continue;
            };

            let shared_data: Option<String> = row.try_get("shared_data")?;
            let raw = match shared_data.as_deref() {
                Some(text) => match serde_json::from_str::<RawEvent>(text) {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!(source_id, %err, "skipping event with unparseable payload");
                        continue;
                    }
                },
                None => RawEvent::new(),
            };

            events.push(HistoricalEvent {
                source_id,
                occurred_at,
                raw,
            });
        }
        Ok(events)
    }
}
