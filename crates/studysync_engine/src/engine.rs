//! The sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{CancelToken, NoProgress, Progress, ProgressReporter};
use crate::report::{StudyInfo, SyncReport, UpdateCheck};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use studysync_client::{ClientError, ClientResult, RemoteApi};
use studysync_protocol::{Outcome, Page, PageRequest, StudyDescriptor, SyncMode};
use studysync_store::{HistoryEntry, LocalStore, Metadata, StoreError, StudyStore};
use tracing::{debug, error, info, warn};

/// The state of one study in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has run in this process.
    Idle,
    /// Pages are being fetched and merged.
    Fetching,
    /// The last run fetched everything.
    Synced,
    /// The last run stopped early.
    Failed,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Fetching)
    }
}

/// Statistics over all runs of this engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that fetched everything.
    pub syncs_completed: u64,
    /// Runs that stopped early.
    pub syncs_failed: u64,
    /// Events newly merged.
    pub events_merged: u64,
    /// Pages merged.
    pub pages_fetched: u64,
    /// When the last run finished.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failed run.
    pub last_error: Option<String>,
}

/// Counters of a run in progress.
struct Run {
    study: String,
    mode: SyncMode,
    started_at: DateTime<Utc>,
    events_merged: u64,
    events_received: u64,
    pages: u64,
    total_expected: Option<u64>,
    truncated: bool,
    metadata: Metadata,
}

impl Run {
    fn progress(&self) -> Progress {
        Progress {
            events_fetched_so_far: self.events_merged,
            events_received_so_far: self.events_received,
            pages_fetched_so_far: self.pages,
            total_expected: self.total_expected,
        }
    }
}

/// Downloads study events and keeps the local store current.
///
/// A run holds the study's exclusive lock from start to finish, so at most
/// one sync or delete is active per study across threads and processes.
/// Every run that acquires the lock appends exactly one history entry.
pub struct SyncEngine<R: RemoteApi> {
    config: SyncConfig,
    remote: R,
    store: LocalStore,
    states: RwLock<HashMap<String, SyncState>>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteApi> SyncEngine<R> {
    /// Creates a new engine.
    pub fn new(config: SyncConfig, remote: R, store: LocalStore) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            remote,
            store,
            states: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the local store.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Gets the state of a study.
    pub fn state(&self, study: &str) -> SyncState {
        self.states
            .read()
            .get(study)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, study: &str, state: SyncState) {
        self.states.write().insert(study.to_string(), state);
    }

    /// Runs a sync without progress reporting or cancellation.
    pub fn sync(&self, study: &str, mode: SyncMode) -> SyncResult<SyncReport> {
        self.sync_with(study, mode, &mut NoProgress, &CancelToken::new())
    }

    /// Runs a sync.
    ///
    /// Failures during the run are reported through the returned
    /// [`SyncReport`] and recorded in the history. `Err` is returned only
    /// when the run could not start: an invalid study name, a study that
    /// is already locked ([`SyncError::ConcurrentSync`]), or a study
    /// directory that cannot be opened. In those cases nothing is written.
    pub fn sync_with(
        &self,
        study: &str,
        mode: SyncMode,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let started_at = Utc::now();

        let mut handle = self.store.open_study(study).map_err(|e| {
            if matches!(e, StoreError::StudyLocked(_)) {
                warn!(study, "sync refused, study is locked");
            }
            SyncError::from(e)
        })?;

        let metadata = match handle.read_metadata() {
            Ok(Some(metadata)) => metadata,
            Ok(None) => Metadata::new(
                started_at,
                handle.storage_format(),
                handle.organization().clone(),
            ),
            Err(e) => return Err(e.into()),
        };

        info!(study, %mode, cursor = ?metadata.high_water_mark, "starting sync");
        self.set_state(study, SyncState::Fetching);

        let mut run = Run {
            study: study.to_string(),
            mode,
            started_at,
            events_merged: 0,
            events_received: 0,
            pages: 0,
            total_expected: None,
            truncated: false,
            metadata,
        };

        let result = match mode {
            SyncMode::Full => self.run_full(&mut handle, &mut run, progress, cancel),
            SyncMode::Incremental => self.run_incremental(&mut handle, &mut run, progress, cancel),
        };

        Ok(self.finish(&handle, run, result, start.elapsed()))
    }

    /// Fetches every page from offset zero.
    ///
    /// After the first page reports a total, the remaining offsets are
    /// fetched in windows of `max_concurrent_requests`. Each window is
    /// merged in offset order and merging stops at the first failed page,
    /// so the cursor never passes a gap. A page whose `next_cursor` does not
    /// reach the following slot (the remote capped the page size) ends the
    /// windowed phase; paging then continues sequentially from that cursor.
    fn run_full(
        &self,
        handle: &mut StudyStore,
        run: &mut Run,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        let limit = self.config.page_size;
        cancel.check()?;
        let first = self.remote.fetch_page(&run.study, &PageRequest::first(limit))?;
        run.total_expected = first.total;
        self.merge_page(handle, run, &first, progress)?;

        let mut next = first.next_cursor;
        if let (Some(start), Some(total)) = (next, first.total) {
            if self.config.max_concurrent_requests > 1 {
                let offsets: Vec<u64> = (start..total).step_by(limit as usize).collect();
                'windows: for window in offsets.chunks(self.config.max_concurrent_requests) {
                    cancel.check()?;
                    let budget = self.config.max_pages.saturating_sub(run.pages) as usize;
                    if budget == 0 {
                        run.truncated = true;
                        return Ok(());
                    }
                    let window = &window[..window.len().min(budget)];

                    for (offset, page) in self.fetch_window(&run.study, window, limit) {
                        let page = page.map_err(|e| {
                            warn!(study = %run.study, offset, error = %e, "page failed");
                            SyncError::from(e)
                        })?;
                        self.merge_page(handle, run, &page, progress)?;
                        next = page.next_cursor;

                        let slot_end = offset + u64::from(limit);
                        if next != Some(slot_end) {
                            if let Some(cursor) = next {
                                debug!(
                                    study = %run.study,
                                    offset,
                                    cursor,
                                    expected = slot_end,
                                    "page does not fill its slot, paging sequentially"
                                );
                            }
                            break 'windows;
                        }
                    }
                }
            }
        }

        // Sequential tail: no total was reported, concurrency is off, a
        // page came back short, or the remote grew while the windows were
        // fetched.
        let request = PageRequest::first(limit);
        self.run_sequential(handle, run, request, next, progress, cancel)
    }

    /// Fetches events stored at or after the cursor.
    ///
    /// The bound is inclusive because several events can share the cursor
    /// timestamp; re-delivered events are dropped by id when merged.
    fn run_incremental(
        &self,
        handle: &mut StudyStore,
        run: &mut Run,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        let request = PageRequest::first(self.config.page_size).since(run.metadata.high_water_mark);
        self.run_sequential(handle, run, request, Some(0), progress, cancel)
    }

    fn run_sequential(
        &self,
        handle: &mut StudyStore,
        run: &mut Run,
        request: PageRequest,
        mut next: Option<u64>,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        while let Some(offset) = next {
            cancel.check()?;
            if run.pages >= self.config.max_pages {
                run.truncated = true;
                return Ok(());
            }

            let page = self
                .remote
                .fetch_page(&run.study, &request.clone().at_offset(offset))
                .map_err(|e| {
                    warn!(study = %run.study, offset, error = %e, "page failed");
                    SyncError::from(e)
                })?;
            if run.total_expected.is_none() {
                run.total_expected = page.total;
            }
            self.merge_page(handle, run, &page, progress)?;

            next = match page.next_cursor {
                // A cursor that does not advance would loop forever.
                Some(cursor) if cursor <= offset => {
                    return Err(SyncError::Protocol(format!(
                        "next cursor {cursor} does not advance past offset {offset}"
                    )))
                }
                other => other,
            };
        }
        Ok(())
    }

    /// Fetches a window of pages in parallel and returns them in offset order.
    fn fetch_window(&self, study: &str, offsets: &[u64], limit: u32) -> Vec<(u64, ClientResult<Page>)> {
        let remote = &self.remote;
        std::thread::scope(|scope| {
            let handles: Vec<_> = offsets
                .iter()
                .map(|&offset| {
                    let request = PageRequest::first(limit).at_offset(offset);
                    (offset, scope.spawn(move || remote.fetch_page(study, &request)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(offset, worker)| {
                    let page = worker
                        .join()
                        .unwrap_or_else(|_| Err(ClientError::transport("page worker panicked")));
                    (offset, page)
                })
                .collect()
        })
    }

    /// Appends one page and persists the updated metadata.
    fn merge_page(
        &self,
        handle: &mut StudyStore,
        run: &mut Run,
        page: &Page,
        progress: &mut dyn ProgressReporter,
    ) -> SyncResult<()> {
        let summary = handle.append(&page.events)?;

        run.pages += 1;
        run.events_received += page.len() as u64;
        run.events_merged += summary.merged;

        let metadata = &mut run.metadata;
        metadata.total_events = handle.event_count();
        metadata.advance_cursor(page.max_timestamp());
        metadata.last_update_at = Utc::now();
        handle.write_metadata(metadata)?;

        debug!(
            study = %run.study,
            page = run.pages,
            offset = page.offset,
            events = page.len(),
            merged = summary.merged,
            "merged page"
        );
        progress.report(run.progress());
        Ok(())
    }

    /// Records the run in the history and builds the report.
    fn finish(
        &self,
        handle: &StudyStore,
        run: Run,
        result: SyncResult<()>,
        duration: Duration,
    ) -> SyncReport {
        let finished_at = Utc::now();
        let mut error = result.err();

        let outcome = match (&error, run.truncated) {
            (None, false) => Outcome::Success,
            (None, true) => Outcome::Partial,
            (Some(_), _) => Outcome::interrupted(run.events_merged),
        };

        let message = match (&error, run.truncated) {
            (Some(e), _) => format!(
                "sync stopped after {} page(s), {} new event(s): {e}",
                run.pages, run.events_merged
            ),
            (None, true) => format!(
                "stopped at the limit of {} page(s), {} new event(s); run again to continue",
                self.config.max_pages, run.events_merged
            ),
            (None, false) => format!(
                "fetched {} new event(s) in {} page(s)",
                run.events_merged, run.pages
            ),
        };

        let entry = HistoryEntry {
            started_at: run.started_at,
            finished_at,
            mode: run.mode,
            events_fetched: run.events_merged,
            events_received: run.events_received,
            pages_fetched: run.pages,
            outcome,
            error_summary: (!outcome.is_success()).then(|| message.clone()),
        };
        if let Err(e) = handle.append_history(&entry) {
            error!(study = %run.study, error = %e, "failed to record history");
            error.get_or_insert(e.into());
        }

        let success = outcome.is_success() && error.is_none();
        let state = if success {
            SyncState::Synced
        } else {
            SyncState::Failed
        };
        self.set_state(&run.study, state);

        {
            let mut stats = self.stats.write();
            if success {
                stats.syncs_completed += 1;
                stats.last_error = None;
            } else {
                stats.syncs_failed += 1;
                stats.last_error = Some(message.clone());
            }
            stats.events_merged += run.events_merged;
            stats.pages_fetched += run.pages;
            stats.last_sync_time = Some(Instant::now());
        }

        if success {
            info!(
                study = %run.study,
                events = run.events_merged,
                pages = run.pages,
                total = handle.event_count(),
                "sync finished"
            );
        } else {
            warn!(study = %run.study, %outcome, "{message}");
        }

        SyncReport {
            study: run.study,
            mode: run.mode,
            success,
            outcome,
            events_fetched: run.events_merged,
            events_received: run.events_received,
            pages_fetched: run.pages,
            total_events: handle.event_count(),
            duration,
            message,
            error,
        }
    }

    /// History of a study, oldest first.
    pub fn history(&self, study: &str) -> SyncResult<Vec<HistoryEntry>> {
        Ok(self.store.read_history(study)?)
    }

    /// Local state of a study.
    pub fn info(&self, study: &str) -> SyncResult<StudyInfo> {
        StudyInfo::load(&self.store, study)
    }

    /// Compares the remote event count with the local one.
    pub fn check_updates(&self, study: &str) -> SyncResult<UpdateCheck> {
        let local = self
            .store
            .read_metadata(study)?
            .map_or(0, |m| m.total_events);
        let remote = self.remote.remote_total(study)?;
        if remote.is_none() {
            debug!(study, "remote did not report a total");
        }
        Ok(UpdateCheck::compare(remote, local))
    }

    /// Deletes the local data of a study.
    ///
    /// Returns `false` if there is nothing to delete, or if the directory
    /// does not look like a study and `force` is not set.
    pub fn delete_study(&self, study: &str, force: bool) -> SyncResult<bool> {
        match self.store.delete(study, force) {
            Ok(deleted) => {
                if deleted {
                    self.states.write().remove(study);
                }
                Ok(deleted)
            }
            Err(StoreError::NotAStudy(_)) => {
                warn!(study, "not deleting a directory without study data");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Syncs every known study, one after another.
    ///
    /// The studies are those the remote lists, followed by local studies it
    /// did not list. `progress` receives the study name with each update.
    /// A study that cannot start does not stop the others; cancellation
    /// stops the loop before the next study.
    pub fn sync_all(
        &self,
        mode: SyncMode,
        progress: &mut dyn FnMut(&str, Progress),
        cancel: &CancelToken,
    ) -> SyncResult<Vec<(String, SyncResult<SyncReport>)>> {
        let mut studies: Vec<String> = self
            .list_remote_studies()?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let listed: HashSet<String> = studies.iter().cloned().collect();
        studies.extend(
            self.list_local_studies()?
                .into_iter()
                .filter(|name| !listed.contains(name)),
        );

        info!(studies = studies.len(), %mode, "syncing all studies");
        let mut results = Vec::with_capacity(studies.len());
        for study in studies {
            if cancel.is_cancelled() {
                info!(done = results.len(), "stopping before {study}, cancelled");
                break;
            }
            let mut report = |p: Progress| progress(&study, p);
            let result = self.sync_with(&study, mode, &mut report, cancel);
            if let Err(e) = &result {
                warn!(study = %study, error = %e, "sync did not start");
            }
            results.push((study, result));
        }
        Ok(results)
    }

    /// Studies available on the remote.
    pub fn list_remote_studies(&self) -> SyncResult<Vec<StudyDescriptor>> {
        Ok(self.remote.list_studies()?)
    }

    /// Studies with local data.
    pub fn list_local_studies(&self) -> SyncResult<Vec<String>> {
        Ok(self.store.list_studies()?)
    }

    /// Returns true if the remote accepts the credential for `study`.
    pub fn test_connection(&self, study: &str) -> bool {
        self.remote.test_connection(study)
    }
}
