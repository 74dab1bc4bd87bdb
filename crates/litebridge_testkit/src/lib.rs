//! # litebridge testkit
//!
//! Test utilities for litebridge.
//!
//! This crate provides:
//! - [`MockEngine`], an in-memory native engine with a refcount ledger,
//!   a hand-driven listener table, blob storage and fault injection
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```
//! use litebridge_testkit::prelude::*;
//!
//! with_test_db(|db| {
//!     let buffer = db.document_buffer(scenario_bytes()).unwrap();
//!     let props = db.properties(&buffer, 1, false).unwrap();
//!     assert_eq!(props.get("flat").unwrap().and_then(|v| v.as_str()), Some("flat"));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::mock::*;
}

pub use fixtures::*;
pub use generators::*;
pub use mock::*;
