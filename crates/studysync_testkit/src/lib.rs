//! # studysync testkit
//!
//! Test utilities for studysync.
//!
//! This crate provides:
//! - Event fixtures with predictable ids and timestamps
//! - [`ScriptedRemote`], an in-memory remote with failure injection
//! - [`CrashingFormat`], a storage format that fails halfway through an append
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use studysync_testkit::prelude::*;
//!
//! let remote = ScriptedRemote::new("demo", make_events(0..250));
//! assert_eq!(remote.event_count(), 250);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use crash::CrashingFormat;
pub use fixtures::*;
pub use remote::{Failure, ScriptedRemote};
