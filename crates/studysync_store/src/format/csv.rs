//! CSV format.
//!
//! Columns are `id,user_id,event_type,timestamp,payload`. The payload column
//! holds the raw remote record as compact JSON. Quoting is left to the `csv`
//! crate.

use super::{truncate_to, EventFormat, StorageFormat};
use crate::error::{StoreError, StoreResult};
use ::csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use studysync_protocol::{wire, Event};
use tracing::warn;

const HEADER: [&str; 5] = ["id", "user_id", "event_type", "timestamp", "payload"];

/// Comma-separated values with a header row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormat;

/// Reads the complete records of a CSV file.
///
/// Returns the records and the byte length of the complete prefix. A final
/// record without its line terminator, or one cut short inside a quoted
/// field, belongs to an interrupted append and is not returned.
fn read_records(data: &[u8]) -> StoreResult<(Vec<StringRecord>, usize)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut records = Vec::new();
    let mut complete = 0;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let end = reader.position().byte() as usize;
        let terminated = end > 0 && data.get(end - 1) == Some(&b'\n');
        let short_tail = end >= data.len() && record.len() < HEADER.len();
        if !terminated || short_tail {
            break;
        }
        records.push(record.clone());
        complete = end;
    }
    Ok((records, complete))
}

fn read_file(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn decode_record(path: &Path, line: usize, record: &StringRecord) -> StoreResult<Event> {
    let corrupted = |what: &str| {
        StoreError::corrupted(format!("{}: record {line}: {what}", path.display()))
    };

    if record.len() != HEADER.len() {
        return Err(corrupted(&format!(
            "expected {} fields, found {}",
            HEADER.len(),
            record.len()
        )));
    }
    let field = |i: usize| record.get(i).unwrap_or_default();

    let timestamp =
        wire::parse_timestamp(field(3)).ok_or_else(|| corrupted("invalid timestamp"))?;
    let payload = match field(4) {
        "" => serde_json::Value::Null,
        text => serde_json::from_str(text).map_err(|e| corrupted(&e.to_string()))?,
    };

    Ok(Event::new(field(0), field(1), field(2), timestamp).with_payload(payload))
}

impl EventFormat for CsvFormat {
    fn format(&self) -> StorageFormat {
        StorageFormat::Csv
    }

    fn append(&self, path: &Path, events: &[Event]) -> StoreResult<()> {
        let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
        }
        for event in events {
            let timestamp = event.timestamp_rfc3339();
            let payload = if event.payload.is_null() {
                String::new()
            } else {
                serde_json::to_string(&event.payload)?
            };
            writer.write_record([
                event.id.as_str(),
                event.user_id.as_str(),
                event.event_type.as_str(),
                timestamp.as_str(),
                payload.as_str(),
            ])?;
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> StoreResult<Vec<Event>> {
        let Some(data) = read_file(path)? else {
            return Ok(Vec::new());
        };

        let (records, complete) = read_records(&data)?;
        if complete < data.len() {
            warn!(
                path = %path.display(),
                bytes = data.len() - complete,
                "ignoring torn trailing record"
            );
        }

        records
            .iter()
            .enumerate()
            .filter(|(n, record)| !(*n == 0 && record.iter().eq(HEADER)))
            .map(|(n, record)| decode_record(path, n + 1, record))
            .collect()
    }

    fn repair(&self, path: &Path) -> StoreResult<()> {
        let Some(data) = read_file(path)? else {
            return Ok(());
        };
        let (_, complete) = read_records(&data)?;
        if complete < data.len() {
            truncate_to(path, complete as u64)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn quoting_survives_commas_quotes_and_newlines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let event = Event::new("e,1", "user \"x\"", "multi\nline", ts)
            .with_payload(json!({"text": "a, \"b\"\nc"}));

        CsvFormat.append(&path, &[event.clone()]).unwrap();
        CsvFormat.append(&path, &[Event::new("e2", "u", "t", ts)]).unwrap();

        let loaded = CsvFormat.load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], event);
        assert_eq!(loaded[1].payload, serde_json::Value::Null);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,user_id,event_type,timestamp,payload\n"));
        assert_eq!(text.matches("id,user_id").count(), 1);
    }

    #[test]
    fn torn_record_is_dropped_by_repair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        CsvFormat.append(&path, &[Event::new("e1", "u", "t", ts)]).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"e2,u,\"unterminated").unwrap();
        drop(file);

        assert_eq!(CsvFormat.load(&path).unwrap().len(), 1);
        CsvFormat.repair(&path).unwrap();
        CsvFormat.append(&path, &[Event::new("e3", "u", "t", ts)]).unwrap();

        let ids: Vec<_> = CsvFormat.load(&path).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
    }

    #[test]
    fn tail_cut_inside_quoted_newline_is_torn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        CsvFormat.append(&path, &[Event::new("e1", "u", "t", ts)]).unwrap();
        let complete = fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"e2,u,\"first line\n").unwrap();
        drop(file);

        assert_eq!(CsvFormat.load(&path).unwrap().len(), 1);
        CsvFormat.repair(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), complete);
    }

    #[test]
    fn short_record_is_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        fs::write(
            &path,
            "id,user_id,event_type,timestamp,payload\nonly,two\ne1,u,t,2024-06-01T08:00:00Z,\n",
        )
        .unwrap();
        assert!(matches!(CsvFormat.load(&path), Err(StoreError::Corrupted(_))));
    }
}
