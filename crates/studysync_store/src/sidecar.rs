//! Metadata and history sidecar files.
//!
//! Metadata is replaced atomically: the new record is written to a
//! temporary file, synced, renamed over the old one, and the directory is
//! synced. History is append-only with one JSON record per line; each
//! append is synced before returning.

use crate::error::{StoreError, StoreResult};
use crate::format::StorageFormat;
use crate::layout::Organization;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use studysync_protocol::{Outcome, SyncMode};
use tracing::warn;

/// Metadata file name.
pub const METADATA_FILE: &str = ".metadata.json";
/// Temporary file for atomic metadata writes.
const METADATA_TEMP: &str = ".metadata.json.tmp";
/// History file name.
pub const HISTORY_FILE: &str = ".download_history.jsonl";

/// Aggregate state of a study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Number of distinct persisted events.
    pub total_events: u64,
    /// When the study was first downloaded.
    pub first_download_at: DateTime<Utc>,
    /// When events were last merged.
    pub last_update_at: DateTime<Utc>,
    /// On-disk format of the event files.
    pub storage_format: StorageFormat,
    /// File organization of the event files.
    #[serde(default)]
    pub organization: Organization,
    /// Largest stored timestamp among persisted events.
    ///
    /// This is the incremental cursor; it only moves forward.
    #[serde(default)]
    pub high_water_mark: Option<DateTime<Utc>>,
}

impl Metadata {
    /// Creates metadata for a study downloaded for the first time.
    pub fn new(now: DateTime<Utc>, storage_format: StorageFormat, organization: Organization) -> Self {
        Self {
            total_events: 0,
            first_download_at: now,
            last_update_at: now,
            storage_format,
            organization,
            high_water_mark: None,
        }
    }

    /// Advances the cursor; an older timestamp leaves it unchanged.
    pub fn advance_cursor(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.high_water_mark = match (self.high_water_mark, timestamp) {
            (Some(current), Some(ts)) => Some(current.max(ts)),
            (current, ts) => current.or(ts),
        };
    }
}

/// Record of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
    /// Sync mode.
    pub mode: SyncMode,
    /// Events newly merged into the store.
    pub events_fetched: u64,
    /// Events delivered by the remote, including already known ones.
    #[serde(default)]
    pub events_received: u64,
    /// Pages fetched.
    pub pages_fetched: u64,
    /// Result of the run.
    pub outcome: Outcome,
    /// Human-readable failure summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

/// Reads the metadata file, if present.
pub fn read_metadata(study_dir: &Path) -> StoreResult<Option<Metadata>> {
    let data = match fs::read(study_dir.join(METADATA_FILE)) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if data.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StoreError::corrupted(format!("{METADATA_FILE}: {e}")))
}

/// Replaces the metadata file atomically.
pub fn write_metadata(study_dir: &Path, metadata: &Metadata) -> StoreResult<()> {
    let temp_path = study_dir.join(METADATA_TEMP);
    let data = serde_json::to_vec_pretty(metadata)?;

    let mut file = File::create(&temp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, study_dir.join(METADATA_FILE))?;
    sync_directory(study_dir)
}

/// Appends one entry to the history file.
pub fn append_history(study_dir: &Path, entry: &HistoryEntry) -> StoreResult<()> {
    let path = study_dir.join(HISTORY_FILE);
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(&path)?;

    // A torn line from an interrupted append is terminated, so the new
    // entry always starts on its own line.
    let len = file.metadata()?.len();
    let mut line = Vec::new();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            line.push(b'\n');
        }
    }
    serde_json::to_writer(&mut line, entry)?;
    line.push(b'\n');

    file.write_all(&line)?;
    file.sync_all()?;
    Ok(())
}

/// Reads all history entries, oldest first.
///
/// Lines that fail to parse are skipped with a warning; they can only be
/// the remains of an interrupted append.
pub fn read_history(study_dir: &Path) -> StoreResult<Vec<HistoryEntry>> {
    let text = match fs::read_to_string(study_dir.join(HISTORY_FILE)) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line = n + 1, error = %e, "skipping unreadable history line"),
        }
    }
    Ok(entries)
}

/// Syncs a directory so renames and creations inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> StoreResult<()> {
    // NTFS journals metadata operations
    Ok(())
}
