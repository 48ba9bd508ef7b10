//! # studysync protocol
//!
//! Shared data model for the studysync downloader.
//!
//! This crate provides:
//! - [`Event`], the immutable record downloaded for a study
//! - [`Page`] and [`PageRequest`] for paginated remote fetches
//! - [`SyncMode`] and [`Outcome`] used by history records
//! - Decoding of the loose remote event JSON into typed events
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod page;
mod sync;
pub mod wire;

pub use error::{WireError, WireResult};
pub use event::{Event, UNKNOWN};
pub use page::{Page, PageRequest, StudyDescriptor};
pub use sync::{Outcome, SyncMode};

/// Validates a study name.
///
/// Study names are lowercase ASCII words separated by single hyphens
/// (`demo-study`). Digits and underscores are accepted inside words for
/// compatibility with older remote datasets.
pub fn is_valid_study_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_names() {
        assert!(is_valid_study_name("demo"));
        assert!(is_valid_study_name("demo-study"));
        assert!(is_valid_study_name("tg_release_test"));
        assert!(!is_valid_study_name(""));
        assert!(!is_valid_study_name("Demo"));
        assert!(!is_valid_study_name("-demo"));
        assert!(!is_valid_study_name("demo--study"));
        assert!(!is_valid_study_name("../etc"));
        assert!(!is_valid_study_name("demo/study"));
    }
}
