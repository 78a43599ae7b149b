//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// Holds one segment blob in one file. The file outlives the handle, so a
/// later process can reopen it; only [`StorageBackend::delete`] removes it.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use spillset_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("spill-00000001.seg")).unwrap();
/// backend.append(b"segment bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    name: String,
    file: RwLock<Option<File>>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and appending.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            file: RwLock::new(Some(file)),
            size: RwLock::new(size),
        })
    }

    /// Opens an existing file without creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        if !path.is_file() {
            let namespace = path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(StorageError::not_found(namespace, name));
        }
        Self::open(path)
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut guard = self.file.write();
        let file = guard
            .as_mut()
            .ok_or_else(|| StorageError::deleted(&self.name))?;

        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut guard = self.file.write();
        let file = guard
            .as_mut()
            .ok_or_else(|| StorageError::deleted(&self.name))?;
        let mut size = self.size.write();

        if data.is_empty() {
            return Ok(*size);
        }

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut guard = self.file.write();
        let file = guard
            .as_mut()
            .ok_or_else(|| StorageError::deleted(&self.name))?;
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        if self.file.read().is_none() {
            return Err(StorageError::deleted(&self.name));
        }
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let guard = self.file.write();
        let file = guard
            .as_ref()
            .ok_or_else(|| StorageError::deleted(&self.name))?;
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let guard = self.file.write();
        let file = guard
            .as_ref()
            .ok_or_else(|| StorageError::deleted(&self.name))?;
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::truncate_past_end(new_size, *size));
        }

        file.set_len(new_size)?;
        *size = new_size;

        Ok(())
    }

    fn delete(&mut self) -> StorageResult<()> {
        let mut guard = self.file.write();
        if guard.take().is_none() {
            return Ok(());
        }
        *self.size.write() = 0;

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_deleted(&self) -> bool {
        self.file.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.name(), "test.seg");
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_reopen_keeps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
    }

    #[test]
    fn file_open_existing_missing_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_existing(&dir.path().join("missing.seg"));
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn file_truncate_then_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"first version").unwrap();
        backend.truncate(0).unwrap();
        let offset = backend.append(b"second").unwrap();

        assert_eq!(offset, 0);
        assert_eq!(backend.read_at(0, 6).unwrap(), b"second");
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn file_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"data").unwrap();
        backend.delete().unwrap();

        assert!(!path.exists());
        assert!(backend.is_deleted());
        assert!(matches!(backend.size(), Err(StorageError::Deleted { .. })));
        assert!(matches!(
            backend.append(b"more"),
            Err(StorageError::Deleted { .. })
        ));
        // second delete is a no-op
        backend.delete().unwrap();
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.seg");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }
}
