//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The stored blob is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The blob was deleted and can no longer be used.
    #[error("blob {name} was deleted")]
    Deleted {
        /// Name of the deleted blob.
        name: String,
    },

    /// No blob with the given name exists in the namespace.
    #[error("blob {name} not found in namespace {namespace}")]
    NotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Name of the missing blob.
        name: String,
    },

    /// The location refused to hand out a new blob.
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates a deleted-blob error.
    pub fn deleted(name: impl Into<String>) -> Self {
        Self::Deleted { name: name.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub(crate) fn truncate_past_end(new_size: u64, size: u64) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot truncate to size {} which is greater than current size {}",
                new_size, size
            ),
        ))
    }
}
