//! Event fixtures and scratch stores.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::ops::Range;
use studysync_protocol::Event;
use studysync_store::{LocalStore, StorageFormat, StoreConfig};
use tempfile::TempDir;

/// Event types cycled through by [`make_event`].
pub const EVENT_TYPES: [&str; 3] = ["trial_start", "response", "trial_end"];

/// Number of distinct users produced by [`make_event`].
pub const USERS: u64 = 5;

/// Timestamp of event 0.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixture time")
}

/// Timestamp of event `n`: one minute apart.
pub fn event_time(n: u64) -> DateTime<Utc> {
    base_time() + Duration::minutes(n as i64)
}

/// Creates the `n`th fixture event.
///
/// Ids are `evt-000000`, `evt-000001`, ...; users and types cycle.
pub fn make_event(n: u64) -> Event {
    let id = format!("evt-{n:06}");
    let user = format!("user-{}", n % USERS);
    let event_type = EVENT_TYPES[(n % EVENT_TYPES.len() as u64) as usize];
    let timestamp = event_time(n);

    Event::new(id.clone(), user.clone(), event_type, timestamp).with_payload(json!({
        "id": id,
        "stored": timestamp.to_rfc3339(),
        "userId": user,
        "types": [event_type],
        "data": { "n": n },
    }))
}

/// Creates fixture events for a range of indices.
pub fn make_events(range: Range<u64>) -> Vec<Event> {
    range.map(make_event).collect()
}

/// Creates an event with an explicit timestamp offset in minutes.
pub fn make_event_at(id: &str, minutes: i64) -> Event {
    Event::new(id, "user-0", EVENT_TYPES[0], base_time() + Duration::minutes(minutes))
}

/// A local store in a temporary directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped.
pub fn temp_store(format: StorageFormat) -> (TempDir, LocalStore) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = LocalStore::new(StoreConfig::new(dir.path()).with_format(format));
    (dir, store)
}

/// Ids of a list of events.
pub fn ids(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.id.clone()).collect()
}
