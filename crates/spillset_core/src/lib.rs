//! # spillset core
//!
//! An external-memory sorted set. Elements are kept in an in-memory buffer
//! until it fills up, then spilled as sorted segments to one of several
//! prioritized storage locations and merged back together on read.
//!
//! This crate provides:
//! - [`OrderedSegment`] - one sorted run, in memory or persisted to a blob
//! - [`KWayMerge`] - lazy merge of sorted cursors, with optional deduplication
//! - [`BufferedSortedSet`] - buffer plus spilled segments, with compaction
//! - [`TieredSelector`] - capacity-aware choice of where each segment goes
//! - [`CompositeView`] - a union of independently owned sorted sets
//!
//! All containers implement [`SortedSet`], and are ordered by an injected
//! [`ElementOrder`] rather than by `Ord`.
//!
//! ## Example
//!
//! ```rust
//! use spillset_core::{BufferedSortedSet, ElementOrder, SortedSet, SpillConfig};
//! use spillset_storage::DirectoryLocation;
//! use std::sync::Arc;
//!
//! let location = Arc::new(DirectoryLocation::temporary().unwrap());
//! let config = SpillConfig::new().buffer_persist_threshold(100);
//! let mut set = BufferedSortedSet::new(config, ElementOrder::natural(), location).unwrap();
//!
//! for n in (0..1000u32).rev() {
//!     set.insert(n).unwrap();
//! }
//! set.persist().unwrap();
//!
//! let view = set.sub_set(10, 15).unwrap();
//! assert_eq!(view.to_vec().unwrap(), vec![10, 11, 12, 13, 14]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffered;
mod composite;
mod config;
mod cursor;
mod error;
mod merge;
mod order;
mod range;
pub mod segment;
mod set;
mod tiered;

pub use buffered::{BufferedSortedSet, SegmentInfo};
pub use composite::CompositeView;
pub use config::{PersistOptions, SpillConfig};
pub use cursor::{slice_cursor, BoxCursor, SetCursor, SetIter};
pub use error::{CoreError, CoreResult};
pub use merge::KWayMerge;
pub use order::{Element, ElementOrder, KeepLatest, KeyValue, RewriteStrategy, SharedRewrite};
pub use range::KeyRange;
pub use segment::{OrderedSegment, SegmentHandle, SegmentId, SegmentView};
pub use set::{BoxSet, SortedSet};
pub use tiered::{CandidateLocation, MinAvailable, TieredSelector};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
