//! # studysync engine
//!
//! Download orchestration for study event logs.
//!
//! The [`SyncEngine`] decides which remote events are missing locally,
//! pages through the remote API, merges pages into the local store and
//! records metadata and history so the next run resumes where this one
//! stopped.
//!
//! ## Modes
//!
//! - **Full**: fetch every page from the beginning. Pages after the first
//!   are fetched in parallel windows of `max_concurrent_requests`.
//! - **Incremental**: fetch only events stored at or after the cursor (the
//!   largest stored timestamp already persisted), one page at a time.
//!
//! ## Key Invariants
//!
//! - An event id is stored at most once per study
//! - `Metadata.total_events` equals the number of distinct stored events
//! - The cursor never moves backwards
//! - History is append-only; every run that starts appends one entry
//! - At most one run or delete holds a study at a time
//! - A failed run keeps the pages it already merged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod progress;
mod report;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use progress::{CancelToken, NoProgress, Progress, ProgressReporter};
pub use report::{StudyInfo, SyncReport, UpdateCheck};
