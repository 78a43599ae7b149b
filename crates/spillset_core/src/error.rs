//! Error types for spillset core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in spillset core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] spillset_storage::StorageError),

    /// Element codec error.
    #[error("codec error: {0}")]
    Codec(#[from] spillset_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to mutate a persisted segment.
    #[error("immutable: {message}")]
    Immutable {
        /// Description of the rejected mutation.
        message: String,
    },

    /// Attempted to write an element outside a bounded view.
    #[error("element outside view range: {message}")]
    OutOfRange {
        /// Description of the element and bound.
        message: String,
    },

    /// A requested range is inverted or wider than the view it was taken from.
    #[error("invalid range: {message}")]
    InvalidRange {
        /// Description of the range problem.
        message: String,
    },

    /// The set (or view) holds no elements.
    #[error("no such element")]
    NoSuchElement,

    /// Iterator removal was called out of protocol.
    #[error("iterator misuse: {message}")]
    IteratorState {
        /// Description of the misuse.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Segment blob is corrupted or has an unknown format.
    #[error("segment corruption in {segment}: {message}")]
    SegmentCorruption {
        /// Name of the segment blob.
        segment: String,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Read-back verification after a persist did not match what was written.
    #[error("verification of {segment} failed: {message}")]
    VerificationFailed {
        /// Name of the segment blob.
        segment: String,
        /// Description of the mismatch.
        message: String,
    },

    /// No candidate location currently has enough free capacity.
    #[error("capacity exhausted: none of {candidates} candidate locations qualifies")]
    CapacityExhausted {
        /// Number of configured candidate locations.
        candidates: usize,
    },

    /// Every eligible location failed to store a segment.
    #[error("unable to persist segment after {attempts} attempts: {source}")]
    PersistFailed {
        /// Total attempts across locations.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A segment being compacted could not be read. The destination of
    /// the compaction is not at fault.
    #[error("compaction input unreadable: {source}")]
    CompactionInput {
        /// The read failure.
        #[source]
        source: Box<CoreError>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an immutability error.
    pub fn immutable(message: impl Into<String>) -> Self {
        Self::Immutable {
            message: message.into(),
        }
    }

    /// Creates an out-of-range error.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// Creates an invalid range error.
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }

    /// Creates an iterator protocol error.
    pub fn iterator_state(message: impl Into<String>) -> Self {
        Self::IteratorState {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(segment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            segment: segment.into(),
            message: message.into(),
        }
    }

    /// Creates a verification error.
    pub fn verification_failed(segment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VerificationFailed {
            segment: segment.into(),
            message: message.into(),
        }
    }

    /// Marks a failure to read a compaction input.
    pub fn compaction_input(err: CoreError) -> Self {
        match err {
            Self::CompactionInput { .. } => err,
            other => Self::CompactionInput {
                source: Box::new(other),
            },
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for failures of the underlying store, which may succeed
    /// on another attempt or at another location.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::SegmentCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::VerificationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_are_classified() {
        let io = CoreError::Io(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(io.is_storage_failure());
        assert!(CoreError::verification_failed("seg", "size").is_storage_failure());
        assert!(!CoreError::immutable("persisted").is_storage_failure());
        assert!(!CoreError::CapacityExhausted { candidates: 2 }.is_storage_failure());
    }

    #[test]
    fn compaction_input_failures_are_not_storage_failures() {
        let corrupt = CoreError::segment_corruption("spill-00000001.seg", "bad magic");
        assert!(corrupt.is_storage_failure());

        let wrapped = CoreError::compaction_input(corrupt);
        assert!(!wrapped.is_storage_failure());
        assert!(wrapped.to_string().contains("bad magic"));

        match CoreError::compaction_input(wrapped) {
            CoreError::CompactionInput { source } => {
                assert!(matches!(*source, CoreError::SegmentCorruption { .. }));
            }
            other => panic!("expected CompactionInput, got {other:?}"),
        }
    }

    #[test]
    fn persist_failed_reports_cause() {
        let err = CoreError::PersistFailed {
            attempts: 3,
            source: Box::new(CoreError::segment_corruption("spill-00000001.seg", "bad magic")),
        };
        let message = err.to_string();
        assert!(message.contains("3 attempts"));
        assert!(message.contains("bad magic"));
    }
}
