//! SQLite format.

use super::{EventFormat, StorageFormat};
use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection};
use std::path::Path;
use studysync_protocol::{wire, Event};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    payload TEXT
)";

/// One `events` table per partition database.
///
/// Appends run in a single transaction with `INSERT OR IGNORE`, so a
/// repeated id never produces a second row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteFormat;

impl EventFormat for SqliteFormat {
    fn format(&self) -> StorageFormat {
        StorageFormat::Sqlite
    }

    fn append(&self, path: &Path, events: &[Event]) -> StoreResult<()> {
        let mut conn = Connection::open(path)?;
        conn.execute(CREATE_TABLE, [])?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO events (id, user_id, event_type, timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                let payload = if event.payload.is_null() {
                    None
                } else {
                    Some(serde_json::to_string(&event.payload)?)
                };
                stmt.execute(params![
                    event.id,
                    event.user_id,
                    event.event_type,
                    event.timestamp_rfc3339(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> StoreResult<Vec<Event>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let conn = Connection::open(path)?;
        conn.execute(CREATE_TABLE, [])?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, event_type, timestamp, payload FROM events ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, user_id, event_type, timestamp, payload) = row?;
            let timestamp = wire::parse_timestamp(&timestamp).ok_or_else(|| {
                StoreError::corrupted(format!(
                    "{}: invalid timestamp for event {id}",
                    path.display()
                ))
            })?;
            let payload = match payload {
                Some(text) => serde_json::from_str(&text)?,
                None => serde_json::Value::Null,
            };
            events.push(Event::new(id, user_id, event_type, timestamp).with_payload(payload));
        }
        Ok(events)
    }
}
