//! # studysync store
//!
//! Local persistence for downloaded study events.
//!
//! Each study lives in its own directory under the data directory and
//! holds:
//!
//! - event files in one [`StorageFormat`], laid out by an [`Organization`]
//! - a [`Metadata`] sidecar, replaced atomically
//! - an append-only history of [`HistoryEntry`] records
//! - an id index used to merge without duplicates
//!
//! Writes go through a [`StudyStore`] handle, which holds an exclusive
//! per-study lock for its lifetime.
//!
//! ```no_run
//! use studysync_store::{LocalStore, StoreConfig};
//!
//! let store = LocalStore::new(StoreConfig::new("data"));
//! let mut study = store.open_study("demo-study")?;
//! let summary = study.append(&[])?;
//! assert_eq!(summary.merged, 0);
//! # Ok::<(), studysync_store::StoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod format;
mod index;
mod layout;
mod lock;
mod sidecar;
mod store;

pub use error::{StoreError, StoreResult};
pub use format::{CsvFormat, EventFormat, JsonLinesFormat, SqliteFormat, StorageFormat};
pub use index::{IdIndex, IDS_FILE, PENDING_MARKER};
pub use layout::{event_files, sanitize, Organization, PartitionKey, MAX_LEVELS};
pub use lock::{StudyLock, LOCK_FILE};
pub use sidecar::{HistoryEntry, Metadata, HISTORY_FILE, METADATA_FILE};
pub use store::{AppendSummary, LocalStore, StoreConfig, StudyStore};
