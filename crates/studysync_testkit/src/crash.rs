//! Crash injection for the local store.
//!
//! [`CrashingFormat`] wraps a real [`EventFormat`] and, on a chosen append,
//! writes the first half of the batch followed by a torn record before
//! failing. This is what a process killed mid-write leaves on disk.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use studysync_store::{LocalStore, StorageFormat, StoreConfig};
//! use studysync_testkit::CrashingFormat;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let format = Arc::new(CrashingFormat::new(StorageFormat::Json).crash_on_append(2));
//! let _store = LocalStore::new(StoreConfig::new(dir.path())).with_event_format(format.clone());
//! assert!(!format.has_crashed());
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use studysync_protocol::Event;
use studysync_store::{EventFormat, StorageFormat, StoreError, StoreResult};

/// An [`EventFormat`] that fails on a chosen append call.
pub struct CrashingFormat {
    inner: Box<dyn EventFormat>,
    crash_on: AtomicU64,
    calls: AtomicU64,
    crashed: AtomicBool,
}

impl CrashingFormat {
    /// Wraps the implementation of `format`; never crashes until armed.
    pub fn new(format: StorageFormat) -> Self {
        Self {
            inner: format.open(),
            crash_on: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Crashes on the `n`th append call (1-based).
    pub fn crash_on_append(self, n: u64) -> Self {
        self.crash_on.store(n, Ordering::SeqCst);
        self
    }

    /// Crashes on the `n`th append call from now (1-based).
    pub fn arm(&self, n: u64) {
        let calls = self.calls.load(Ordering::SeqCst);
        self.crash_on.store(calls + n, Ordering::SeqCst);
    }

    /// Returns true once the crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of append calls so far.
    pub fn append_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn torn_record(&self) -> Option<&'static [u8]> {
        match self.inner.format() {
            StorageFormat::Json => Some(b"{\"id\":\"torn-"),
            StorageFormat::Csv => Some(b"torn-record,user,\"unterminated"),
            // SQLite commits whole transactions; there is no torn tail.
            StorageFormat::Sqlite => None,
        }
    }
}

impl EventFormat for CrashingFormat {
    fn format(&self) -> StorageFormat {
        self.inner.format()
    }

    fn append(&self, path: &Path, events: &[Event]) -> StoreResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call != self.crash_on.load(Ordering::SeqCst) {
            return self.inner.append(path, events);
        }

        self.crashed.store(true, Ordering::SeqCst);
        let half = events.len() / 2;
        if half > 0 {
            self.inner.append(path, &events[..half])?;
        }
        if let Some(torn) = self.torn_record() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(torn)?;
        }
        Err(StoreError::Io(std::io::Error::other(
            "simulated crash during append",
        )))
    }

    fn load(&self, path: &Path) -> StoreResult<Vec<Event>> {
        self.inner.load(path)
    }

    fn repair(&self, path: &Path) -> StoreResult<()> {
        self.inner.repair(path)
    }
}
