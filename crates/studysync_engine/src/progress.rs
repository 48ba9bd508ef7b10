//! Progress reporting and cancellation.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Snapshot of a running sync, reported after every merged page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Events newly merged so far.
    pub events_fetched_so_far: u64,
    /// Events delivered by the remote so far, including known ones.
    pub events_received_so_far: u64,
    /// Pages merged so far.
    pub pages_fetched_so_far: u64,
    /// Remote event count, when reported.
    pub total_expected: Option<u64>,
}

/// Receives progress updates.
///
/// Any `FnMut(Progress)` closure is a reporter.
pub trait ProgressReporter {
    /// Called after each merged page.
    fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressReporter for F {
    fn report(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Reporter that ignores updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _progress: Progress) {}
}

/// Cooperative cancellation flag, checked before every page request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
