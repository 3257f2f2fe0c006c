//! # Tandem Testkit
//!
//! Test utilities for tandem.
//!
//! This crate provides:
//! - Sample HR schemas, record builders and a wired [`TestHarness`]
//! - An in-memory primary store that drives the lifecycle hooks
//! - Property-based test generators using proptest
//! - Concurrent-writer stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tandem_testkit::prelude::*;
//!
//! #[test]
//! fn replicates_on_commit() {
//!     with_harness(|h| {
//!         let mut tx = h.primary.begin();
//!         tx.insert(employee(1, "Ada"));
//!         tx.commit().unwrap();
//!         assert_eq!(h.target.row_count("employee"), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod primary;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::primary::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use primary::*;
pub use stress::*;
