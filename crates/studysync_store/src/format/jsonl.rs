//! JSON Lines format.

use super::{truncate_to, EventFormat, StorageFormat};
use crate::error::{StoreError, StoreResult};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use studysync_protocol::Event;
use tracing::warn;

/// One JSON-encoded event per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesFormat;

impl EventFormat for JsonLinesFormat {
    fn format(&self) -> StorageFormat {
        StorageFormat::Json
    }

    fn append(&self, path: &Path, events: &[Event]) -> StoreResult<()> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> StoreResult<Vec<Event>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let (complete, torn) = match text.rfind('\n') {
            Some(pos) => text.split_at(pos + 1),
            None => ("", text.as_str()),
        };
        if !torn.is_empty() {
            warn!(path = %path.display(), bytes = torn.len(), "ignoring torn trailing record");
        }

        complete
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    StoreError::corrupted(format!("{}:{}: {e}", path.display(), n + 1))
                })
            })
            .collect()
    }

    fn repair(&self, path: &Path) -> StoreResult<()> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() || data.ends_with(b"\n") {
            return Ok(());
        }
        let keep = data.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        truncate_to(path, keep as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn event(id: &str) -> Event {
        Event::new(id, "u1", "click", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
            .with_payload(json!({"id": id, "score": 3}))
    }

    #[test]
    fn append_then_load_preserves_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        JsonLinesFormat.append(&path, &[event("a"), event("b")]).unwrap();
        JsonLinesFormat.append(&path, &[event("c")]).unwrap();

        let ids: Vec<_> = JsonLinesFormat
            .load(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(JsonLinesFormat.load(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_ignored_and_repaired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        JsonLinesFormat.append(&path, &[event("a")]).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"b\",\"user_").unwrap();
        drop(file);

        assert_eq!(JsonLinesFormat.load(&path).unwrap().len(), 1);

        JsonLinesFormat.repair(&path).unwrap();
        JsonLinesFormat.append(&path, &[event("c")]).unwrap();
        let ids: Vec<_> = JsonLinesFormat
            .load(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "not json\n").unwrap();
        assert!(matches!(
            JsonLinesFormat.load(&path),
            Err(StoreError::Corrupted(_))
        ));
    }
}
