//! Results returned to callers.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use studysync_protocol::{Outcome, SyncMode};
use studysync_store::{HistoryEntry, LocalStore, Metadata, Organization, StorageFormat};

/// Result of one sync run.
#[derive(Debug)]
pub struct SyncReport {
    /// Study name.
    pub study: String,
    /// Mode the run used.
    pub mode: SyncMode,
    /// True iff the run fetched everything it set out to fetch.
    pub success: bool,
    /// Outcome recorded in the history.
    pub outcome: Outcome,
    /// Events newly merged.
    pub events_fetched: u64,
    /// Events delivered by the remote.
    pub events_received: u64,
    /// Pages merged.
    pub pages_fetched: u64,
    /// Distinct events stored after the run.
    pub total_events: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Human-readable summary.
    pub message: String,
    /// The error that ended the run, if any.
    pub error: Option<SyncError>,
}

impl SyncReport {
    /// Process exit code: 0 on success, otherwise non-zero.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            self.error.as_ref().map_or(1, SyncError::exit_code)
        }
    }
}

/// Local state of a study.
#[derive(Debug, Clone)]
pub struct StudyInfo {
    /// Study name.
    pub study: String,
    /// True if any events are stored.
    pub has_data: bool,
    /// Metadata, if the study was synced before.
    pub metadata: Option<Metadata>,
    /// Storage format in use (or configured for a new study).
    pub storage_format: StorageFormat,
    /// Organization in use (or configured for a new study).
    pub organization: Organization,
    /// Number of history entries.
    pub runs: usize,
    /// Most recent history entry.
    pub last_run: Option<HistoryEntry>,
}

impl StudyInfo {
    /// Reads the local state of `study` without taking its lock.
    pub fn load(store: &LocalStore, study: &str) -> SyncResult<Self> {
        let metadata = store.read_metadata(study)?;
        let history = store.read_history(study)?;
        let config = store.config();

        let (storage_format, organization) = match &metadata {
            Some(m) => (m.storage_format, m.organization.clone()),
            None => (config.format, config.organization.clone()),
        };

        Ok(Self {
            study: study.to_string(),
            has_data: metadata.as_ref().is_some_and(|m| m.total_events > 0),
            metadata,
            storage_format,
            organization,
            runs: history.len(),
            last_run: history.last().cloned(),
        })
    }

    /// Outcome of the most recent run.
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_run.as_ref().map(|entry| entry.outcome)
    }

    /// Distinct events stored.
    pub fn total_events(&self) -> u64 {
        self.metadata.as_ref().map_or(0, |m| m.total_events)
    }
}

/// Answer to "are there new remote events?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCheck {
    /// True if the remote holds more events than the local store.
    pub has_updates: bool,
    /// `max(0, remote - local)`.
    pub new_events_available: u64,
    /// Remote event count, if reported.
    pub remote_total: Option<u64>,
    /// Local event count.
    pub local_total: u64,
}

impl UpdateCheck {
    /// Compares remote and local counts.
    pub fn compare(remote_total: Option<u64>, local_total: u64) -> Self {
        let new_events_available = remote_total.map_or(0, |r| r.saturating_sub(local_total));
        Self {
            has_updates: new_events_available > 0,
            new_events_available,
            remote_total,
            local_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_check_never_negative() {
        let check = UpdateCheck::compare(Some(240), 250);
        assert!(!check.has_updates);
        assert_eq!(check.new_events_available, 0);

        let check = UpdateCheck::compare(Some(260), 250);
        assert!(check.has_updates);
        assert_eq!(check.new_events_available, 10);

        assert!(!UpdateCheck::compare(None, 3).has_updates);
    }

    #[test]
    fn exit_code_follows_error() {
        let mut report = SyncReport {
            study: "demo".into(),
            mode: SyncMode::Full,
            success: true,
            outcome: Outcome::Success,
            events_fetched: 0,
            events_received: 0,
            pages_fetched: 0,
            total_events: 0,
            duration: Duration::ZERO,
            message: String::new(),
            error: None,
        };
        assert_eq!(report.exit_code(), 0);

        report.success = false;
        report.outcome = Outcome::Partial;
        assert_eq!(report.exit_code(), 1);

        report.error = Some(SyncError::RemoteAuth("denied".into()));
        assert_eq!(report.exit_code(), 3);
    }
}
