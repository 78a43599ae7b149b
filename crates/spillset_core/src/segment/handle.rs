//! Backing store handles for persisted segments.

use crate::error::CoreResult;
use spillset_storage::StorageBackend;
use std::fmt;

/// Prefix of every segment blob name.
pub const SEGMENT_PREFIX: &str = "spill-";

/// Suffix of every segment blob name.
pub const SEGMENT_SUFFIX: &str = ".seg";

/// Where a segment sits in the age order of its set.
///
/// A spill takes the next sequence number with generation zero. A
/// compaction output keeps the sequence of its oldest input and the next
/// generation, so it sorts exactly where its inputs did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    /// Sequence number assigned when the first data of the segment spilled.
    pub sequence: u64,
    /// Number of compactions folded into the segment.
    pub generation: u32,
}

impl SegmentId {
    /// Id of a freshly spilled segment.
    pub const fn new(sequence: u64) -> Self {
        Self {
            sequence,
            generation: 0,
        }
    }

    /// Id of a compaction output taking this segment's place.
    #[must_use]
    pub const fn next_generation(self) -> Self {
        Self {
            sequence: self.sequence,
            generation: self.generation + 1,
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "{:08}", self.sequence)
        } else {
            write!(f, "{:08}-{:04}", self.sequence, self.generation)
        }
    }
}

/// Blob name for the segment with the given id.
pub fn segment_name(id: SegmentId) -> String {
    format!("{SEGMENT_PREFIX}{id}{SEGMENT_SUFFIX}")
}

/// Parses a segment id back out of a blob name.
pub fn parse_segment_name(name: &str) -> Option<SegmentId> {
    let stem = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    let (sequence, generation) = match stem.split_once('-') {
        Some((sequence, generation)) => (sequence, generation.parse::<u32>().ok()?),
        None => (stem, 0),
    };
    Some(SegmentId {
        sequence: sequence.parse().ok()?,
        generation,
    })
}

/// A segment's claim on one blob in one location.
///
/// Dropping a handle closes it but leaves the blob in place so it can be
/// recovered; [`release`](Self::release) deletes the blob.
pub struct SegmentHandle {
    backend: Box<dyn StorageBackend>,
    location: String,
    id: SegmentId,
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("name", &self.backend.name())
            .field("location", &self.location)
            .field("id", &self.id)
            .finish()
    }
}

impl SegmentHandle {
    /// Wraps a backend created or opened at `location`.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        location: impl Into<String>,
        id: SegmentId,
    ) -> Self {
        Self {
            backend,
            location: location.into(),
            id,
        }
    }

    /// Blob name.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Description of the location holding the blob.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Position of the segment in the age order of its set.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Sequence number of the segment's id.
    pub fn sequence(&self) -> u64 {
        self.id.sequence
    }

    /// Current blob size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn StorageBackend {
        self.backend.as_mut()
    }

    /// Deletes the blob.
    pub fn release(mut self) -> CoreResult<()> {
        self.backend.delete()?;
        tracing::debug!(
            segment = self.backend.name(),
            location = %self.location,
            "released segment blob"
        );
        Ok(())
    }

    /// Deletes the blob, logging instead of returning a failure.
    pub(crate) fn discard(self) {
        let name = self.name().to_string();
        if let Err(err) = self.release() {
            tracing::warn!(segment = %name, error = %err, "failed to release segment blob");
        }
    }
}
