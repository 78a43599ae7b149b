//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared blob bytes.
pub(crate) type Blob = Arc<RwLock<Vec<u8>>>;

/// Registry of blobs keyed by `(namespace, name)`.
pub(crate) type BlobMap = Arc<RwLock<BTreeMap<(String, String), Blob>>>;

/// Link from a backend back to the registry that lists it.
#[derive(Debug)]
struct Registration {
    entries: BlobMap,
    namespace: String,
}

/// An in-memory storage backend.
///
/// A standalone backend (from [`InMemoryBackend::new`]) is suitable for unit
/// tests. Backends handed out by a [`crate::MemoryLocation`] share their bytes
/// with the location's registry, so the blob stays visible to `list`/`open`
/// until it is deleted - the same lifecycle a remote store entry has.
///
/// # Example
///
/// ```rust
/// use spillset_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    name: String,
    data: Blob,
    registration: Option<Registration>,
    deleted: bool,
}

impl InMemoryBackend {
    /// Creates a new empty, unregistered in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing corruption and recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            ..Self::default()
        }
    }

    pub(crate) fn registered(entries: BlobMap, namespace: &str, name: &str, data: Blob) -> Self {
        Self {
            name: name.to_string(),
            data,
            registration: Some(Registration {
                entries,
                namespace: namespace.to_string(),
            }),
            deleted: false,
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn ensure_live(&self) -> StorageResult<()> {
        if self.deleted {
            return Err(StorageError::deleted(&self.name));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.ensure_live()?;
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.ensure_live()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_live()
    }

    fn size(&self) -> StorageResult<u64> {
        self.ensure_live()?;
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_live()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_live()?;
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::truncate_past_end(new_size, current_size));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn delete(&mut self) -> StorageResult<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.data.write().clear();
        if let Some(registration) = self.registration.take() {
            registration
                .entries
                .write()
                .remove(&(registration.namespace, self.name.clone()));
        }
        Ok(())
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}
