//! Sync mode and outcome enums shared by the engine and the history log.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a sync decides which remote events to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fetch everything from the beginning, ignoring the cursor.
    Full,
    /// Fetch only events at or after the cursor.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Final disposition of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every intended page was fetched and merged.
    Success,
    /// Some events were merged before the run stopped.
    Partial,
    /// The run stopped before merging anything.
    Failed,
}

impl Outcome {
    /// Picks `Partial` or `Failed` for an interrupted run.
    pub fn interrupted(events_merged: u64) -> Self {
        if events_merged > 0 {
            Outcome::Partial
        } else {
            Outcome::Failed
        }
    }

    /// Returns true for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Partial => f.write_str("partial"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}
