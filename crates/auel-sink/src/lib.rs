//! Sink writers: idempotent single-row persistence of canonical records.
//!
//! Every sink implements [`SinkWriter`] and differs only in connection
//! parameters and SQL dialect. A write is one connection-scoped transaction;
//! all data-layer errors are converted into a classified [`Outcome`] and
//! never propagate past the sink boundary.

use std::time::Duration;

use async_trait::async_trait;
use auel_core::CanonicalRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlSink;
pub use postgres::PostgresSink;
pub use sqlite::SqliteSink;

pub const CRATE_NAME: &str = "auel-sink";

/// Result of a single sink write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The row was inserted and committed.
    Success,
    /// A row with the same idempotency key already exists; nothing written.
    Skipped,
    /// The write failed; the row is not durable in this sink.
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

/// Why a sink write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The sink could not be reached within its connect timeout.
    Connectivity(String),
    /// The insert violated an integrity constraint.
    Constraint(String),
    Unknown(String),
}

/// Errors surfaced by sink construction and the startup-time probes.
/// Per-write failures never use this type; they classify into [`Outcome`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Behavioral knobs shared by every sink, passed at construction.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Bound on pool acquisition; an unreachable sink reports
    /// `Failure(Connectivity)` instead of blocking.
    pub connect_timeout: Duration,
    pub max_connections: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }
}

/// A backing store capable of durably persisting one [`CanonicalRecord`]
/// per call, independently of every other sink.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    fn sink_id(&self) -> &str;

    /// Create the `app_usage_events` table and its unique index on
    /// `event_id` if they do not exist yet.
    async fn ensure_schema(&self) -> Result<(), SinkError>;

    /// One bounded connection acquisition plus a trivial query. Used by the
    /// migration entry point to fail fast before any write has occurred.
    async fn ping(&self) -> Result<(), SinkError>;

    /// Insert one row inside its own transaction. Never returns an error
    /// and never panics; every data-layer failure classifies into the
    /// returned [`Outcome`].
    async fn write(&self, record: &CanonicalRecord) -> Outcome;
}

/// Classify a data-layer error into the failure taxonomy.
pub fn classify_error(err: &sqlx::Error) -> FailureReason {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => FailureReason::Connectivity(err.to_string()),
        sqlx::Error::Database(db)
            if db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation() =>
        {
            FailureReason::Constraint(db.message().to_string())
        }
        other => FailureReason::Unknown(other.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Shared tail of every dialect's `write`: a duplicate idempotency key that
/// raced past the pre-check lookup is a skip, not a failure.
pub(crate) fn finish_write(
    sink_id: &str,
    record: &CanonicalRecord,
    result: Result<Outcome, sqlx::Error>,
) -> Outcome {
    match result {
        Ok(outcome) => {
            debug!(sink = sink_id, ?outcome, "write finished");
            outcome
        }
        Err(err) if record.source_id.is_some() && is_unique_violation(&err) => {
            debug!(sink = sink_id, "duplicate event_id, skipping");
            Outcome::Skipped
        }
        Err(err) => Outcome::Failure(classify_error(&err)),
    }
}
