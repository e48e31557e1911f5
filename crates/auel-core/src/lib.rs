//! Canonical event model and normalization rules for AUEL.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CRATE_NAME: &str = "auel-core";

/// An incoming event payload as delivered by the event source.
///
/// No keys are required; everything the normalizer cares about is optional
/// and degrades to a documented default when absent or mistyped.
pub type RawEvent = serde_json::Map<String, Value>;

/// The normalized row shape written to every sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub event_name: String,
    pub app_name: String,
    /// Organization the event belongs to. Absent and empty-string inputs
    /// both normalize to `None`; an empty string is never stored.
    pub org: Option<String>,
    /// Naive local time. No timezone conversion happens anywhere.
    pub timestamp: NaiveDateTime,
    /// The full raw payload serialized as JSON, kept verbatim for audit and
    /// replay.
    pub payload: String,
    /// Idempotency key for backfilled records; `None` for live dispatch.
    pub source_id: Option<i64>,
}

impl CanonicalRecord {
    pub fn with_source_id(mut self, source_id: i64) -> Self {
        self.source_id = Some(source_id);
        self
    }
}

const UNKNOWN: &str = "unknown";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalize a loosely formatted timestamp string.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS` with an optional sub-second fraction and an
/// optional trailing `Z`. The fraction and zone marker are discarded, not
/// converted. Absent, empty, or unparseable input yields `now`; a malformed
/// timestamp must never block persistence.
pub fn normalize_timestamp(raw: Option<&str>, now: NaiveDateTime) -> NaiveDateTime {
    let Some(raw) = raw else {
        return now;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return now;
    }
    let cleaned = trimmed.trim_end_matches('Z');
    let cleaned = cleaned.split('.').next().unwrap_or(cleaned);
    let cleaned = cleaned.replace('T', " ");
    NaiveDateTime::parse_from_str(&cleaned, TIMESTAMP_FORMAT).unwrap_or(now)
}

/// Normalize a raw payload into a [`CanonicalRecord`].
///
/// Field extraction never fails: missing or mistyped values degrade to the
/// defaults documented on [`CanonicalRecord`]. The payload keeps every key
/// of the raw map, including the ones lifted into their own columns.
pub fn normalize_event(raw: &RawEvent, now: NaiveDateTime) -> CanonicalRecord {
    CanonicalRecord {
        event_name: string_field(raw, "event_name"),
        app_name: string_field(raw, "app_name"),
        org: raw
            .get("org")
            .and_then(Value::as_str)
            .filter(|org| !org.is_empty())
            .map(str::to_owned),
        timestamp: normalize_timestamp(raw.get("timestamp").and_then(Value::as_str), now),
        payload: serde_json::to_string(raw).unwrap_or_else(|_| "{}".to_string()),
        source_id: None,
    }
}

fn string_field(raw: &RawEvent, key: &str) -> String {
    match raw.get(key).and_then(Value::as_str) {
        Some(value) => value.to_string(),
        None => UNKNOWN.to_string(),
    }
}
