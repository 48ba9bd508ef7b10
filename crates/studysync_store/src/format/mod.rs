//! Pluggable on-disk event formats.
//!
//! A study is written in exactly one [`StorageFormat`], chosen when the
//! study is opened. Each format implements [`EventFormat`] for a single
//! partition file; the organization layer decides which file an event
//! belongs to.

mod csv;
mod jsonl;
mod sqlite;

pub use self::csv::CsvFormat;
pub use self::jsonl::JsonLinesFormat;
pub use self::sqlite::SqliteFormat;

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use studysync_protocol::Event;

/// Supported storage formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// JSON Lines, one event per line.
    #[default]
    Json,
    /// CSV with a header row; the payload is stored as JSON text.
    Csv,
    /// One SQLite database per partition file.
    Sqlite,
}

impl StorageFormat {
    /// File extension of partition files.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "jsonl",
            Self::Csv => "csv",
            Self::Sqlite => "db",
        }
    }

    /// Returns the implementation for this format.
    pub fn open(self) -> Box<dyn EventFormat> {
        match self {
            Self::Json => Box::new(JsonLinesFormat),
            Self::Csv => Box::new(CsvFormat),
            Self::Sqlite => Box::new(SqliteFormat),
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        })
    }
}

impl FromStr for StorageFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown storage format '{other}' (expected json, csv or sqlite)"
            ))),
        }
    }
}

/// Reads and writes events in one partition file.
///
/// `append` must be atomic or leave at most a torn tail that [`repair`]
/// can cut off. `load` returns events in the order they were appended and
/// an empty list when the file does not exist.
///
/// [`repair`]: EventFormat::repair
pub trait EventFormat: Send + Sync {
    /// The format this implementation writes.
    fn format(&self) -> StorageFormat;

    /// Appends events to the file, creating it if needed.
    fn append(&self, path: &Path, events: &[Event]) -> StoreResult<()>;

    /// Loads all complete events from the file.
    fn load(&self, path: &Path) -> StoreResult<Vec<Event>>;

    /// Removes an incomplete trailing record left by an interrupted append.
    fn repair(&self, _path: &Path) -> StoreResult<()> {
        Ok(())
    }
}

/// Truncates a file to `len` bytes and syncs it.
pub(crate) fn truncate_to(path: &Path, len: u64) -> StoreResult<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}
