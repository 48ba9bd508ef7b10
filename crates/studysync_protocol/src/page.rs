//! Page request and response types.

use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of one paginated events request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Lower bound (inclusive) on the stored timestamp, if any.
    pub since: Option<DateTime<Utc>>,
    /// Number of events to skip.
    pub offset: u64,
    /// Maximum number of events to return.
    pub limit: u32,
}

impl PageRequest {
    /// Creates a request for the first page.
    pub fn first(limit: u32) -> Self {
        Self {
            since: None,
            offset: 0,
            limit,
        }
    }

    /// Sets the `since` lower bound.
    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    /// Sets the offset.
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// One bounded response unit from the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Events in the order the remote returned them.
    pub events: Vec<Event>,
    /// Offset this page was requested at.
    pub offset: u64,
    /// Total number of events matching the request, when reported.
    pub total: Option<u64>,
    /// Offset of the next page; present iff more pages remain.
    pub next_cursor: Option<u64>,
}

impl Page {
    /// Returns true if this is the last page.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    /// Number of events in this page.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the page carries no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Latest timestamp in the page.
    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.timestamp).max()
    }
}

/// A study advertised by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDescriptor {
    /// Study name.
    pub name: String,
    /// Optional human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StudyDescriptor {
    /// Creates a descriptor with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}
