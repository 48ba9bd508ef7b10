//! Exclusive per-study lock.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Lock file name inside the study directory.
pub const LOCK_FILE: &str = ".lock";

/// Advisory lock held for the duration of a sync or delete.
///
/// The lock is taken with a non-blocking exclusive file lock, so it also
/// excludes other processes. It is released when the guard is dropped.
#[derive(Debug)]
pub struct StudyLock {
    study: String,
    _file: File,
}

impl StudyLock {
    /// Acquires the lock for `study` in `study_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StudyLocked`] if another guard holds it.
    pub fn acquire(study: &str, study_dir: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(study_dir.join(LOCK_FILE))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::StudyLocked(study.to_string()));
        }

        Ok(Self {
            study: study.to_string(),
            _file: file,
        })
    }

    /// The locked study.
    pub fn study(&self) -> &str {
        &self.study
    }
}
