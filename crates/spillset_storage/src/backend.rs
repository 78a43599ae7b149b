//! Storage backend trait definition.

use crate::error::StorageResult;

/// A handle to a single segment blob.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, and flushing data. The segment layer owns all format
/// interpretation - backends do not understand records, elements, or trailers.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` ensures all appended data reached the underlying store
/// - After `delete`, the blob is gone and every other call fails
/// - Backends must be `Send + Sync` so a set can move between workers
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and in-process stores
/// - [`super::FileBackend`] - For file-system storage
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Returns the name of the blob inside its namespace.
    fn name(&self) -> &str;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - The blob was deleted
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the blob.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob was deleted or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the blob in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the blob to the given size.
    ///
    /// Segments are rewritten in place by truncating to zero and appending
    /// the new contents.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Deletes the blob from its store, releasing the storage it used.
    ///
    /// Deleting an already deleted blob is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying entry cannot be removed.
    fn delete(&mut self) -> StorageResult<()>;

    /// Returns true once [`StorageBackend::delete`] succeeded.
    fn is_deleted(&self) -> bool;
}
