//! # spillset Testkit
//!
//! Test utilities for spillset.
//!
//! This crate provides:
//! - Fixtures that pair a set with the location it spills to
//! - Property-based generators for operation sequences
//! - A reference model to check a spilling set against
//! - Crash simulation by damaging segment blobs on disk
//! - Sequential stress runs
//!
//! ## Usage
//!
//! ```rust
//! use spillset_testkit::prelude::*;
//! use spillset_core::SortedSet;
//!
//! with_memory_set(4, 3, |set| {
//!     set.insert_all(0..10).unwrap();
//!     assert!(set.segment_count() > 0);
//!     assert_eq!(set.to_vec().unwrap(), (0..10).collect::<Vec<u32>>());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use stress::*;
