//! Axum JSON read API over the cloud replica, serving the dashboard.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "auel-web";

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build state over a lazy pool; no connection is made until the first
    /// query, so startup never blocks on an unreachable replica.
    pub fn connect_lazy(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().connect_lazy(url)?;
        Ok(Self::new(pool))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub event_id: Option<i64>,
    pub event_name: String,
    pub app_name: String,
    pub org: Option<String>,
    pub timestamp: NaiveDateTime,
    pub event_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppCountRow {
    pub app_name: String,
    pub count: i64,
}

#[derive(Debug, Deserialize, Default)]
struct RecentQuery {
    app_name: Option<String>,
    limit: Option<i64>,
}

fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Query failures surface as a 500 with a JSON error body, never a panic.
struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/events/recent", get(recent_events_handler))
        .route("/events/summary", get(summary_handler))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "read api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn recent_events_handler(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<EventRow>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let rows = match query.app_name.as_deref().filter(|name| !name.is_empty()) {
        Some(app_name) => {
            sqlx::query(
                "SELECT id, event_id, event_name, app_name, org, timestamp, event_data \
                 FROM app_usage_events WHERE app_name = $1 \
                 ORDER BY timestamp DESC, id DESC LIMIT $2",
            )
            .bind(app_name)
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, event_id, event_name, app_name, org, timestamp, event_data \
                 FROM app_usage_events ORDER BY timestamp DESC, id DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
    };

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        events.push(EventRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            event_name: row.try_get("event_name")?,
            app_name: row.try_get("app_name")?,
            org: row.try_get("org")?,
            timestamp: row.try_get("timestamp")?,
            event_data: row.try_get("event_data")?,
        });
    }
    Ok(Json(events))
}

async fn summary_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<AppCountRow>>, ApiError> {
    let rows = sqlx::query(
        "SELECT app_name, COUNT(*) AS count FROM app_usage_events \
         GROUP BY app_name ORDER BY count DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut counts = Vec::with_capacity(rows.len());
    for row in rows {
        counts.push(AppCountRow {
            app_name: row.try_get("app_name")?,
            count: row.try_get("count")?,
        });
    }
    Ok(Json(counts))
}
