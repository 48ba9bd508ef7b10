//! The local store and per-study handles.

use crate::error::{StoreError, StoreResult};
use crate::format::{EventFormat, StorageFormat};
use crate::index::{self, IdIndex};
use crate::layout::{self, Organization};
use crate::lock::StudyLock;
use crate::sidecar::{self, HistoryEntry, Metadata, HISTORY_FILE, METADATA_FILE};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use studysync_protocol::{is_valid_study_name, Event};
use tracing::{debug, info, warn};

/// Configuration for the local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per study.
    pub data_dir: PathBuf,
    /// Format for newly created studies.
    pub format: StorageFormat,
    /// Organization for newly created studies.
    pub organization: Organization,
}

impl StoreConfig {
    /// Creates a configuration with JSON Lines and a single event file.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            format: StorageFormat::default(),
            organization: Organization::by_study(),
        }
    }

    /// Sets the storage format.
    pub fn with_format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the organization.
    pub fn with_organization(mut self, organization: Organization) -> Self {
        self.organization = organization;
        self
    }
}

/// Result of merging a batch of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    /// Events written for the first time.
    pub merged: u64,
    /// Events skipped because their id was already stored.
    pub duplicates: u64,
}

/// Root of all locally stored studies.
///
/// Read operations need no lock. Writes go through a [`StudyStore`], which
/// holds the study's exclusive lock.
pub struct LocalStore {
    config: StoreConfig,
    format_override: Option<Arc<dyn EventFormat>>,
}

impl LocalStore {
    /// Creates a store rooted at `config.data_dir`.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            format_override: None,
        }
    }

    /// Uses a custom [`EventFormat`] for every study.
    pub fn with_event_format(mut self, format: Arc<dyn EventFormat>) -> Self {
        self.config.format = format.format();
        self.format_override = Some(format);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory of a study.
    pub fn study_dir(&self, study: &str) -> StoreResult<PathBuf> {
        if !is_valid_study_name(study) {
            return Err(StoreError::InvalidStudyName(study.to_string()));
        }
        Ok(self.config.data_dir.join(study))
    }

    /// Returns true if the study has a metadata or history file.
    pub fn is_study(&self, study: &str) -> bool {
        self.study_dir(study).is_ok_and(|dir| is_study_dir(&dir))
    }

    /// Names of local studies, sorted.
    pub fn list_studies(&self) -> StoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_valid_study_name(&name) && is_study_dir(&entry.path()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Opens a study for writing, creating its directory if needed.
    ///
    /// An existing study keeps the format and organization recorded in its
    /// metadata. An append interrupted by a crash is recovered here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StudyLocked`] if another handle is open.
    pub fn open_study(&self, study: &str) -> StoreResult<StudyStore> {
        let dir = self.study_dir(study)?;
        fs::create_dir_all(&dir)?;
        let lock = StudyLock::acquire(study, &dir)?;

        let (format, organization) = match sidecar::read_metadata(&dir)? {
            Some(meta) => {
                if meta.storage_format != self.config.format {
                    info!(
                        study,
                        existing = %meta.storage_format,
                        configured = %self.config.format,
                        "keeping existing storage format"
                    );
                }
                (meta.storage_format, meta.organization)
            }
            None => (self.config.format, self.config.organization.clone()),
        };

        StudyStore::open(study, dir, self.event_format(format), organization, lock)
    }

    fn event_format(&self, format: StorageFormat) -> Arc<dyn EventFormat> {
        match &self.format_override {
            Some(custom) if custom.format() == format => Arc::clone(custom),
            _ => Arc::from(format.open()),
        }
    }

    /// Reads a study's metadata.
    pub fn read_metadata(&self, study: &str) -> StoreResult<Option<Metadata>> {
        sidecar::read_metadata(&self.study_dir(study)?)
    }

    /// Reads a study's history, oldest first.
    pub fn read_history(&self, study: &str) -> StoreResult<Vec<HistoryEntry>> {
        sidecar::read_history(&self.study_dir(study)?)
    }

    /// Loads all events of a study without taking its lock.
    pub fn load_events(&self, study: &str) -> StoreResult<Vec<Event>> {
        let dir = self.study_dir(study)?;
        let format = sidecar::read_metadata(&dir)?
            .map_or(self.config.format, |m| m.storage_format);
        load_all(&dir, self.event_format(format).as_ref())
    }

    /// Removes all data of a study.
    ///
    /// The directory is first renamed out of the way, so readers see either
    /// the whole study or nothing. Returns `Ok(false)` if the study does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAStudy`] if the directory has no metadata or
    /// history and `force` is false, and [`StoreError::StudyLocked`] if a
    /// sync is running.
    pub fn delete(&self, study: &str, force: bool) -> StoreResult<bool> {
        let dir = self.study_dir(study)?;
        if !dir.is_dir() {
            return Ok(false);
        }
        if !force && !is_study_dir(&dir) {
            return Err(StoreError::NotAStudy(study.to_string()));
        }

        let lock = StudyLock::acquire(study, &dir)?;
        let trash = self
            .config
            .data_dir
            .join(format!(".trash-{}-{}", study, uuid::Uuid::new_v4()));
        fs::rename(&dir, &trash)?;
        sidecar::sync_directory(&self.config.data_dir)?;
        drop(lock);

        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!(study, path = %trash.display(), error = %e, "failed to remove trash directory");
        }
        info!(study, "deleted local study data");
        Ok(true)
    }
}

fn is_study_dir(dir: &Path) -> bool {
    dir.join(METADATA_FILE).is_file() || dir.join(HISTORY_FILE).is_file()
}

/// Loads every event file in `dir`, keeping the first copy of each id.
fn load_all(dir: &Path, format: &dyn EventFormat) -> StoreResult<Vec<Event>> {
    let mut seen = HashSet::new();
    let mut events = Vec::new();
    for path in layout::event_files(dir, format.format().extension())? {
        for event in format.load(&path)? {
            if seen.insert(event.id.clone()) {
                events.push(event);
            }
        }
    }
    Ok(events)
}

/// Rebuilds the id index after an interrupted append.
fn recover(study: &str, dir: &Path, format: &dyn EventFormat) -> StoreResult<IdIndex> {
    warn!(study, "recovering from interrupted append");
    for path in layout::event_files(dir, format.format().extension())? {
        format.repair(&path)?;
    }
    let events = load_all(dir, format)?;
    let newest = events.iter().map(|e| e.timestamp).max();
    let index = IdIndex::rebuild(dir, events.into_iter().map(|e| e.id))?;

    reconcile_metadata(study, dir, &index, || Ok(newest))?;
    index::clear_pending(dir)?;
    info!(study, events = index.len(), "rebuilt event index");
    Ok(index)
}

/// Brings the metadata counters in line with the persisted events.
///
/// A crash between an append and the following metadata write leaves the
/// metadata behind the event files. The total is reset to the index size
/// and the cursor advanced to the newest stored event.
fn reconcile_metadata(
    study: &str,
    dir: &Path,
    index: &IdIndex,
    newest: impl FnOnce() -> StoreResult<Option<DateTime<Utc>>>,
) -> StoreResult<()> {
    let Some(mut metadata) = sidecar::read_metadata(dir)? else {
        return Ok(());
    };
    if metadata.total_events == index.len() {
        return Ok(());
    }

    warn!(
        study,
        recorded = metadata.total_events,
        stored = index.len(),
        "metadata out of date, reconciling"
    );
    metadata.total_events = index.len();
    metadata.advance_cursor(newest()?);
    sidecar::write_metadata(dir, &metadata)
}

/// Write handle for one study.
///
/// Holds the study lock until dropped. `append` is the de-duplication
/// boundary: an id already stored is never written again.
pub struct StudyStore {
    study: String,
    dir: PathBuf,
    format: Arc<dyn EventFormat>,
    organization: Organization,
    index: IdIndex,
    needs_recovery: bool,
    _lock: StudyLock,
}

impl StudyStore {
    fn open(
        study: &str,
        dir: PathBuf,
        format: Arc<dyn EventFormat>,
        organization: Organization,
        lock: StudyLock,
    ) -> StoreResult<Self> {
        let index = if index::is_pending(&dir) {
            recover(study, &dir, format.as_ref())?
        } else {
            let index = IdIndex::load(&dir)?;
            reconcile_metadata(study, &dir, &index, || {
                Ok(load_all(&dir, format.as_ref())?
                    .into_iter()
                    .map(|e| e.timestamp)
                    .max())
            })?;
            index
        };

        Ok(Self {
            study: study.to_string(),
            dir,
            format,
            organization,
            index,
            needs_recovery: false,
            _lock: lock,
        })
    }

    /// Study name.
    pub fn study(&self) -> &str {
        &self.study
    }

    /// Study directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Format of the event files.
    pub fn storage_format(&self) -> StorageFormat {
        self.format.format()
    }

    /// Organization of the event files.
    pub fn organization(&self) -> &Organization {
        &self.organization
    }

    /// Number of distinct stored events.
    pub fn event_count(&self) -> u64 {
        self.index.len()
    }

    /// Returns true if an event with this id is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Merges events, skipping ids that are already stored.
    ///
    /// Events keep their relative order within each target file. If the
    /// write fails, previously stored data stays valid and the next append
    /// or open reconciles the index with the event files.
    pub fn append(&mut self, events: &[Event]) -> StoreResult<AppendSummary> {
        if self.needs_recovery {
            self.index = recover(&self.study, &self.dir, self.format.as_ref())?;
            self.needs_recovery = false;
        }

        let mut batch_ids = HashSet::new();
        let fresh: Vec<&Event> = events
            .iter()
            .filter(|e| !self.index.contains(&e.id) && batch_ids.insert(e.id.as_str()))
            .collect();
        let summary = AppendSummary {
            merged: fresh.len() as u64,
            duplicates: (events.len() - fresh.len()) as u64,
        };
        if fresh.is_empty() {
            return Ok(summary);
        }

        if let Err(e) = self.write_batch(&fresh) {
            self.needs_recovery = true;
            return Err(e);
        }

        debug!(
            study = %self.study,
            events = summary.merged,
            duplicates = summary.duplicates,
            "merged events"
        );
        Ok(summary)
    }

    fn write_batch(&mut self, events: &[&Event]) -> StoreResult<()> {
        index::mark_pending(&self.dir)?;

        let extension = self.format.format().extension();
        let mut slots: HashMap<PathBuf, usize> = HashMap::new();
        let mut groups: Vec<(PathBuf, Vec<Event>)> = Vec::new();
        for event in events {
            let rel = self.organization.relative_path(event, extension);
            let slot = *slots.entry(rel.clone()).or_insert_with(|| {
                groups.push((rel, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push((*event).clone());
        }

        for (rel, batch) in &groups {
            let path = self.dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.format.append(&path, batch)?;
        }

        self.index.record(events.iter().map(|e| e.id.as_str()))?;
        index::clear_pending(&self.dir)
    }

    /// Loads all stored events.
    pub fn load_events(&self) -> StoreResult<Vec<Event>> {
        load_all(&self.dir, self.format.as_ref())
    }

    /// Reads the metadata.
    pub fn read_metadata(&self) -> StoreResult<Option<Metadata>> {
        sidecar::read_metadata(&self.dir)
    }

    /// Replaces the metadata atomically.
    pub fn write_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        sidecar::write_metadata(&self.dir, metadata)
    }

    /// Appends a history entry.
    pub fn append_history(&self, entry: &HistoryEntry) -> StoreResult<()> {
        sidecar::append_history(&self.dir, entry)
    }

    /// Reads the history, oldest first.
    pub fn read_history(&self) -> StoreResult<Vec<HistoryEntry>> {
        sidecar::read_history(&self.dir)
    }
}
