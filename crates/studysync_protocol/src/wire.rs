//! Decoding of remote JSON payloads.
//!
//! The remote service returns loosely structured events. Depending on the
//! study, the interesting fields live at the top level or inside a nested
//! `object` / `base` record:
//!
//! ```text
//! { "id": "...", "stored": "...", "timestamp": "...", "types": ["click"], ... }
//! { "stored": "...", "object": { "userId": "u1", "index": 7, "tsGenerated": "..." } }
//! ```
//!
//! `stored` is the authoritative timestamp: it is when the service accepted
//! the event and is what incremental fetches filter on.

use crate::error::{WireError, WireResult};
use crate::event::{Event, UNKNOWN};
use crate::page::{Page, PageRequest, StudyDescriptor};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

const NESTED_RECORDS: [&str; 2] = ["object", "base"];

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (`2024-01-01T10:00:00Z`, `...+02:00`) and naive
/// date-times without an offset, which are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn nested<'a>(obj: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
    NESTED_RECORDS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_object))
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decodes one remote event object.
pub fn decode_event(raw: Value) -> WireResult<Event> {
    let obj = raw
        .as_object()
        .ok_or_else(|| WireError::invalid_structure("event is not an object"))?;
    let inner = nested(obj);

    let stored = text(obj.get("stored"))
        .or_else(|| text(obj.get("stored_timestamp")))
        .or_else(|| text(obj.get("timestamp")))
        .or_else(|| inner.and_then(|n| text(n.get("tsGenerated"))))
        .unwrap_or_default();

    let id = text(obj.get("id"))
        .or_else(|| {
            inner.and_then(|n| {
                let user = text(n.get("userId"))?;
                let index = text(n.get("index")).unwrap_or_default();
                Some(format!("{user}_{index}"))
            })
        })
        .unwrap_or_else(|| stored.clone());

    let user_id = inner
        .and_then(|n| text(n.get("userId")))
        .or_else(|| text(obj.get("userId")))
        .or_else(|| text(obj.get("user_id")))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let event_type = obj
        .get("types")
        .and_then(Value::as_array)
        .and_then(|types| text(types.first()))
        .or_else(|| text(obj.get("event_type")))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let timestamp = parse_timestamp(&stored).ok_or_else(|| WireError::InvalidTimestamp {
        id: id.clone(),
        value: stored.clone(),
    })?;

    if id.is_empty() {
        return Err(WireError::invalid_structure("event has no id"));
    }

    Ok(Event {
        id,
        user_id,
        event_type,
        timestamp,
        payload: raw,
    })
}

/// Decodes a page of events.
///
/// The body has the shape `{"events": [...], "total": n, "next_cursor": o}`.
/// When `next_cursor` is absent, another page exists only if this page is
/// full and `offset + len < total`.
pub fn decode_page(body: &[u8], request: &PageRequest) -> WireResult<Page> {
    let value: Value = serde_json::from_slice(body)?;
    let obj = value
        .as_object()
        .ok_or_else(|| WireError::invalid_structure("page is not an object"))?;

    let raw_events = match obj.get("events") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(WireError::invalid_structure("`events` is not an array")),
    };

    let events = raw_events
        .into_iter()
        .map(decode_event)
        .collect::<WireResult<Vec<_>>>()?;

    let total = obj.get("total").and_then(Value::as_u64);
    let len = events.len() as u64;

    let next_cursor = match obj.get("next_cursor") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::Null) => None,
        Some(_) => return Err(WireError::invalid_structure("`next_cursor` is not a number")),
        None => {
            let end = request.offset + len;
            let full = len > 0 && len >= u64::from(request.limit);
            match total {
                Some(total) if full && end < total => Some(end),
                None if full => Some(end),
                _ => None,
            }
        }
    };

    Ok(Page {
        events,
        offset: request.offset,
        total,
        next_cursor,
    })
}

/// Decodes the study listing.
///
/// Accepts a bare array or `{"studies": [...]}`; each entry is either a
/// name string or an object with `name` and optional `description`.
pub fn decode_studies(body: &[u8]) -> WireResult<Vec<StudyDescriptor>> {
    let value: Value = serde_json::from_slice(body)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("studies") {
            Some(Value::Array(items)) => items,
            _ => return Err(WireError::invalid_structure("missing `studies` array")),
        },
        _ => return Err(WireError::invalid_structure("study list is not an array")),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(StudyDescriptor::named(name)),
            Value::Object(_) => serde_json::from_value(item).map_err(WireError::from),
            _ => Err(WireError::invalid_structure("study entry is not a name or object")),
        })
        .collect()
}
