//! Organization of event files inside a study directory.
//!
//! ```text
//! <data_dir>/<study>/
//! ├─ .metadata.json             # aggregate counters (atomic replace)
//! ├─ .download_history.jsonl    # one line per sync run (append-only)
//! ├─ .ids                       # known event ids
//! ├─ .lock                      # exclusive study lock
//! ├─ events.jsonl               # by_study
//! ├─ 2024-01-02_events.jsonl    # by_date
//! └─ u1/2024-01-02_events.jsonl # by_user_id/by_date
//! ```

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use studysync_protocol::Event;

/// Maximum number of partition levels.
pub const MAX_LEVELS: usize = 2;

/// An event attribute that selects a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// Participant id.
    UserId,
    /// Calendar date of the stored timestamp.
    Date,
    /// Event type.
    EventType,
}

impl PartitionKey {
    fn name(self) -> &'static str {
        match self {
            Self::UserId => "by_user_id",
            Self::Date => "by_date",
            Self::EventType => "by_event_type",
        }
    }

    fn value(self, event: &Event) -> String {
        let raw = match self {
            Self::UserId => event.user_id.clone(),
            Self::Date => event.date_key(),
            Self::EventType => event.event_type.clone(),
        };
        sanitize(&raw)
    }
}

impl FromStr for PartitionKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "by_user_id" | "user_id" => Ok(Self::UserId),
            "by_date" | "date" => Ok(Self::Date),
            "by_event_type" | "event_type" => Ok(Self::EventType),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown partition key '{other}'"
            ))),
        }
    }
}

/// How events are spread over files.
///
/// An empty level list is `by_study`: a single `events.<ext>` file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Organization {
    levels: Vec<PartitionKey>,
}

impl Organization {
    /// All events in one file.
    pub fn by_study() -> Self {
        Self::default()
    }

    /// Creates an organization from partition levels.
    pub fn new(levels: Vec<PartitionKey>) -> StoreResult<Self> {
        if levels.len() > MAX_LEVELS {
            return Err(StoreError::InvalidConfig(format!(
                "at most {MAX_LEVELS} partition levels are supported"
            )));
        }
        Ok(Self { levels })
    }

    /// Partition levels, outermost first.
    pub fn levels(&self) -> &[PartitionKey] {
        &self.levels
    }

    /// Path of the file holding `event`, relative to the study directory.
    pub fn relative_path(&self, event: &Event, extension: &str) -> PathBuf {
        match self.levels.as_slice() {
            [] => PathBuf::from(format!("events.{extension}")),
            [key] => PathBuf::from(format!("{}_events.{extension}", key.value(event))),
            [outer, inner, ..] => PathBuf::from(outer.value(event))
                .join(format!("{}_events.{extension}", inner.value(event))),
        }
    }

}

/// Lists existing event files with `extension` under `study_dir`, sorted.
///
/// Files from any organization are found, so a study keeps loading
/// correctly after its organization setting changes.
pub fn event_files(study_dir: &Path, extension: &str) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_event_files(study_dir, extension, MAX_LEVELS, &mut files)?;
    files.sort();
    Ok(files)
}

fn is_event_file(path: &Path, extension: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let suffix = format!("events.{extension}");
    !name.starts_with('.') && (name == suffix || name.ends_with(&format!("_{suffix}")))
}

fn collect_event_files(
    dir: &Path,
    extension: &str,
    depth: usize,
    out: &mut Vec<PathBuf>,
) -> StoreResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            if depth > 1 {
                collect_event_files(&path, extension, depth - 1, out)?;
            }
        } else if is_event_file(&path, extension) {
            out.push(path);
        }
    }
    Ok(())
}

/// Replaces characters outside `[A-Za-z0-9_.-]` with `_`.
///
/// Empty values and the `.`/`..` path components map to `unknown`.
pub fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => studysync_protocol::UNKNOWN.to_string(),
        _ => cleaned,
    }
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.levels.is_empty() {
            return f.write_str("by_study");
        }
        let names: Vec<_> = self.levels.iter().map(|k| k.name()).collect();
        f.write_str(&names.join("/"))
    }
}

impl FromStr for Organization {
    type Err = StoreError;

    /// Parses `by_study`, a single key, or two keys joined by `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "by_study" {
            return Ok(Self::by_study());
        }
        let levels = s
            .split(['/', ','])
            .map(str::parse)
            .collect::<StoreResult<Vec<_>>>()?;
        Self::new(levels)
    }
}

impl TryFrom<String> for Organization {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Organization> for String {
    fn from(value: Organization) -> Self {
        value.to_string()
    }
}
