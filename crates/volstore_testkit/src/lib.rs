//! # volstore Testkit
//!
//! Test utilities for volstore.
//!
//! This crate provides:
//! - Session fixtures for every storage kind, with temporary files cleaned
//!   up on drop
//! - A backend-agnostic conformance suite, instantiated per backend with
//!   [`conformance_tests!`]
//! - Property-based generators for volumes, snapshots and connections
//!
//! ## Usage
//!
//! ```rust,ignore
//! // tests/memory.rs
//! volstore_testkit::conformance_tests!(volstore_testkit::TestSession::memory());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
