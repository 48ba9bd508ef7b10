//! The event record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when a partition field is missing from an event.
pub const UNKNOWN: &str = "unknown";

/// A single timestamped record downloaded for a study.
///
/// Events are immutable once fetched and are uniquely identified by
/// [`Event::id`] within a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id within the study.
    pub id: String,
    /// Participant the event belongs to.
    pub user_id: String,
    /// Event type name.
    pub event_type: String,
    /// Time the remote service stored the event.
    pub timestamp: DateTime<Utc>,
    /// The complete remote record.
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates an event with an empty payload.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp,
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Calendar date of the timestamp (`YYYY-MM-DD`, UTC).
    pub fn date_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    /// Timestamp in RFC 3339 form with millisecond precision.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
