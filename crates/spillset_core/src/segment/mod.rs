//! Ordered segments.
//!
//! A segment is one sorted run of elements. While in memory it behaves like
//! an ordinary sorted set; once persisted its contents live in a single
//! blob and it becomes read-only until loaded again.

mod file_cursor;
mod format;
mod handle;
mod ordered;
mod view;

pub use format::{inspect_segment, SegmentSummary, FORMAT_VERSION, SEGMENT_MAGIC, TRAILER_MAGIC};
pub use handle::{
    parse_segment_name, segment_name, SegmentHandle, SegmentId, SEGMENT_PREFIX, SEGMENT_SUFFIX,
};
pub use ordered::OrderedSegment;
pub use view::SegmentView;
