//! Side index of persisted event ids.
//!
//! The index lets `append` skip known ids without rescanning event files.
//! Ids are stored one JSON string per line in `.ids`. While an append is in
//! flight a `.append.pending` marker exists; a marker found at open time
//! means the event files and the index may disagree, and the index is
//! rebuilt from the event files.

use crate::error::StoreResult;
use crate::sidecar::sync_directory;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Index file name.
pub const IDS_FILE: &str = ".ids";
const IDS_TEMP: &str = ".ids.tmp";
/// Marker present while an append is in progress.
pub const PENDING_MARKER: &str = ".append.pending";

/// Set of event ids persisted for one study.
#[derive(Debug)]
pub struct IdIndex {
    dir: PathBuf,
    ids: HashSet<String>,
}

impl IdIndex {
    /// Loads the index from `study_dir`.
    pub fn load(study_dir: &Path) -> StoreResult<Self> {
        let text = match fs::read_to_string(study_dir.join(IDS_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut ids = HashSet::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            match serde_json::from_str::<String>(line) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!(error = %e, "skipping unreadable index line"),
            }
        }

        Ok(Self {
            dir: study_dir.to_path_buf(),
            ids,
        })
    }

    /// Replaces the index with `ids`, writing it atomically.
    pub fn rebuild(
        study_dir: &Path,
        ids: impl IntoIterator<Item = String>,
    ) -> StoreResult<Self> {
        let ids: HashSet<String> = ids.into_iter().collect();

        let mut data = Vec::new();
        for id in &ids {
            serde_json::to_writer(&mut data, id)?;
            data.push(b'\n');
        }
        let temp_path = study_dir.join(IDS_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, study_dir.join(IDS_FILE))?;
        sync_directory(study_dir)?;

        Ok(Self {
            dir: study_dir.to_path_buf(),
            ids,
        })
    }

    /// Returns true if the id is persisted.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of persisted ids.
    pub fn len(&self) -> u64 {
        self.ids.len() as u64
    }

    /// Returns true if no ids are persisted.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records newly persisted ids.
    pub fn record<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> StoreResult<()> {
        let mut data = Vec::new();
        let mut fresh = Vec::new();
        for id in ids {
            if !self.ids.contains(id) {
                serde_json::to_writer(&mut data, id)?;
                data.push(b'\n');
                fresh.push(id.to_string());
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(IDS_FILE))?;
        file.write_all(&data)?;
        file.sync_all()?;
        self.ids.extend(fresh);
        Ok(())
    }
}

/// Creates the pending marker.
pub(crate) fn mark_pending(study_dir: &Path) -> StoreResult<()> {
    File::create(study_dir.join(PENDING_MARKER))?.sync_all()?;
    Ok(())
}

/// Removes the pending marker.
pub(crate) fn clear_pending(study_dir: &Path) -> StoreResult<()> {
    match fs::remove_file(study_dir.join(PENDING_MARKER)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Returns true if an append was interrupted.
pub(crate) fn is_pending(study_dir: &Path) -> bool {
    study_dir.join(PENDING_MARKER).exists()
}
