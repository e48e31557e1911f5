//! Environment-resolved configuration for the relay and migrator.

use std::path::PathBuf;
use std::time::Duration;

use auel_sink::SinkConfig;

/// Deployment configuration, resolved from environment variables with
/// defaults matching the Home Assistant add-on environment. Credentials are
/// never literal here; they ride in the connection URLs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local MariaDB sink.
    pub local_database_url: String,
    /// Cloud Postgres replica sink and backfill target.
    pub cloud_database_url: String,
    /// Home Assistant's internal SQLite database, the backfill source.
    pub ha_db_path: PathBuf,
    /// Event type selected from the historical source.
    pub event_type: String,
    pub connect_timeout: Duration,
    pub batch_size: usize,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            local_database_url: std::env::var("LOCAL_DATABASE_URL").unwrap_or_else(|_| {
                "mysql://homeassistant@core-mariadb:3306/app_usage".to_string()
            }),
            cloud_database_url: std::env::var("NEON_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/app_usage".to_string()),
            ha_db_path: std::env::var("HA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/config/home-assistant_v2.db")),
            event_type: std::env::var("AUEL_EVENT_TYPE")
                .unwrap_or_else(|_| "app_usage_event".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("AUEL_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            batch_size: std::env::var("AUEL_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(100),
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            connect_timeout: self.connect_timeout,
            ..SinkConfig::default()
        }
    }
}
