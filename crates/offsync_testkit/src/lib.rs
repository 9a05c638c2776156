//! # offsync testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - Entity and mutation fixtures
//! - A temporary file-backed store that reopens like a restarted process
//! - Property-based test generators using proptest
//! - Tracing initialisation for test output
//!
//! ## Usage
//!
//! ```rust
//! use offsync_testkit::prelude::*;
//!
//! init_tracing();
//! let event = sample_event("Standup");
//! assert_eq!(event.title, "Standup");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
