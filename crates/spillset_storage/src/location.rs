//! Storage locations: factories for segment blobs.
//!
//! A location is one place segments can be spilled to - a local directory,
//! a mounted distributed file system, or a remote object store. Blobs are
//! grouped into namespaces (one per spilled set) so start-up scans only see
//! the blobs of the set that owns them.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::{Blob, BlobMap, InMemoryBackend};
use parking_lot::Mutex;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Total and currently available capacity of a location, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Total capacity.
    pub total: u64,
    /// Capacity still available for new blobs.
    pub available: u64,
}

impl Capacity {
    /// Returns the available capacity as a fraction of the total (0.0 - 1.0).
    #[must_use]
    pub fn available_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.available as f64 / self.total as f64
    }
}

/// A factory for segment blobs at one storage location.
///
/// # Invariants
///
/// - `create` hands out an empty blob; an existing blob of the same name is truncated
/// - `list` only reports blobs that have not been deleted
/// - `capacity` is measured on every call, never cached
pub trait StoreLocation: Send + Sync + fmt::Debug {
    /// Human readable description used in logs.
    fn describe(&self) -> String;

    /// Creates a new, empty blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be created.
    fn create(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Reopens an existing blob.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no such blob exists.
    fn open(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Lists the blob names in a namespace, sorted. Unknown namespaces are empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be read.
    fn list(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Lists the namespaces that currently hold blobs, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be read.
    fn namespaces(&self) -> StorageResult<Vec<String>>;

    /// Returns true if the location can currently be used.
    fn is_valid(&self) -> bool {
        true
    }

    /// Measures the capacity of the location.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity cannot be determined.
    fn capacity(&self) -> StorageResult<Capacity>;
}

fn check_component(component: &str) -> StorageResult<()> {
    let invalid = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\']);
    if invalid {
        return Err(StorageError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid blob path component: {component:?}"),
        )));
    }
    Ok(())
}

/// A directory on a local or mounted file system.
///
/// ```text
/// <root>/
/// └─ <namespace>/
///    ├─ spill-00000001.seg
///    └─ spill-00000002.seg
/// ```
#[derive(Debug)]
pub struct DirectoryLocation {
    root: PathBuf,
    /// Owned scratch directory, removed with the location.
    _temp: Option<TempDir>,
}

impl DirectoryLocation {
    /// Opens a directory location, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root, _temp: None })
    }

    /// Creates a location in a fresh temporary directory.
    ///
    /// The directory and everything spilled into it is removed when the
    /// location is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn temporary() -> StorageResult<Self> {
        let temp = tempfile::Builder::new().prefix("spillset-").tempdir()?;
        Ok(Self {
            root: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, namespace: &str, name: &str) -> StorageResult<PathBuf> {
        check_component(namespace)?;
        check_component(name)?;
        Ok(self.root.join(namespace).join(name))
    }

    fn sorted_entries(dir: &Path, want_dirs: bool) -> StorageResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() == want_dirs {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl StoreLocation for DirectoryLocation {
    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    fn create(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.blob_path(namespace, name)?;
        let mut backend = FileBackend::open_with_create_dirs(&path)?;
        backend.truncate(0)?;
        Ok(Box::new(backend))
    }

    fn open(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.blob_path(namespace, name)?;
        Ok(Box::new(FileBackend::open_existing(&path)?))
    }

    fn list(&self, namespace: &str) -> StorageResult<Vec<String>> {
        check_component(namespace)?;
        Self::sorted_entries(&self.root.join(namespace), false)
    }

    fn namespaces(&self) -> StorageResult<Vec<String>> {
        Self::sorted_entries(&self.root, true)
    }

    fn is_valid(&self) -> bool {
        self.root.is_dir()
    }

    fn capacity(&self) -> StorageResult<Capacity> {
        Ok(Capacity {
            total: fs2::total_space(&self.root)?,
            available: fs2::available_space(&self.root)?,
        })
    }
}

#[derive(Debug)]
struct MemoryState {
    valid: bool,
    failures_to_inject: u32,
}

/// A shared in-process store.
///
/// Stands in for a remote store in tests and single-process deployments:
/// blobs outlive the handles that wrote them, capacity is a configured
/// budget minus the bytes currently stored, and creation failures can be
/// injected to exercise retry handling.
#[derive(Debug)]
pub struct MemoryLocation {
    label: String,
    total: u64,
    entries: BlobMap,
    state: Mutex<MemoryState>,
}

impl MemoryLocation {
    /// Creates an empty location with unlimited capacity.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: u64::MAX,
            entries: BlobMap::default(),
            state: Mutex::new(MemoryState {
                valid: true,
                failures_to_inject: 0,
            }),
        }
    }

    /// Sets the total capacity in bytes.
    #[must_use]
    pub fn with_capacity(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Makes the next `count` calls to `create` fail.
    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().failures_to_inject = count;
    }

    /// Marks the location valid or invalid.
    pub fn set_valid(&self, valid: bool) {
        self.state.lock().valid = valid;
    }

    /// Returns the number of blobs stored across all namespaces.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns the number of bytes stored across all namespaces.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|blob| blob.read().len() as u64)
            .sum()
    }
}

impl StoreLocation for MemoryLocation {
    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn create(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        check_component(namespace)?;
        check_component(name)?;
        {
            let mut state = self.state.lock();
            if !state.valid {
                return Err(StorageError::Unavailable(self.describe()));
            }
            if state.failures_to_inject > 0 {
                state.failures_to_inject -= 1;
                return Err(StorageError::Unavailable(format!(
                    "{}: injected create failure",
                    self.describe()
                )));
            }
        }

        let blob: Blob = Arc::default();
        self.entries
            .write()
            .insert((namespace.to_string(), name.to_string()), Arc::clone(&blob));
        Ok(Box::new(InMemoryBackend::registered(
            Arc::clone(&self.entries),
            namespace,
            name,
            blob,
        )))
    }

    fn open(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let key = (namespace.to_string(), name.to_string());
        let blob = self
            .entries
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(namespace, name))?;
        Ok(Box::new(InMemoryBackend::registered(
            Arc::clone(&self.entries),
            namespace,
            name,
            blob,
        )))
    }

    fn list(&self, namespace: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn namespaces(&self) -> StorageResult<Vec<String>> {
        let mut namespaces: Vec<String> =
            self.entries.read().keys().map(|(ns, _)| ns.clone()).collect();
        namespaces.dedup();
        Ok(namespaces)
    }

    fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    fn capacity(&self) -> StorageResult<Capacity> {
        Ok(Capacity {
            total: self.total,
            available: self.total.saturating_sub(self.used_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_fraction() {
        let capacity = Capacity {
            total: 200,
            available: 50,
        };
        assert!((capacity.available_fraction() - 0.25).abs() < f64::EPSILON);
        let empty = Capacity {
            total: 0,
            available: 0,
        };
        assert_eq!(empty.available_fraction(), 0.0);
    }

    #[test]
    fn directory_create_list_open() {
        let location = DirectoryLocation::temporary().unwrap();

        let mut blob = location.create("set-a", "spill-00000001.seg").unwrap();
        blob.append(b"abc").unwrap();
        location.create("set-a", "spill-00000002.seg").unwrap();
        location.create("set-b", "spill-00000001.seg").unwrap();

        assert_eq!(
            location.list("set-a").unwrap(),
            vec!["spill-00000001.seg", "spill-00000002.seg"]
        );
        assert_eq!(location.namespaces().unwrap(), vec!["set-a", "set-b"]);
        assert!(location.list("set-c").unwrap().is_empty());

        let reopened = location.open("set-a", "spill-00000001.seg").unwrap();
        assert_eq!(reopened.read_at(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn directory_create_truncates_existing() {
        let location = DirectoryLocation::temporary().unwrap();
        let mut blob = location.create("ns", "blob").unwrap();
        blob.append(b"old contents").unwrap();

        let fresh = location.create("ns", "blob").unwrap();
        assert_eq!(fresh.size().unwrap(), 0);
    }

    #[test]
    fn directory_rejects_path_traversal() {
        let location = DirectoryLocation::temporary().unwrap();
        assert!(location.create("..", "blob").is_err());
        assert!(location.create("ns", "a/b").is_err());
        assert!(location.list("").is_err());
    }

    #[test]
    fn directory_delete_unlists_blob() {
        let location = DirectoryLocation::temporary().unwrap();
        let mut blob = location.create("ns", "blob").unwrap();
        blob.delete().unwrap();
        assert!(location.list("ns").unwrap().is_empty());
        assert!(matches!(
            location.open("ns", "blob"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn directory_temporary_is_removed_on_drop() {
        let location = DirectoryLocation::temporary().unwrap();
        let root = location.root().to_path_buf();
        location.create("ns", "blob").unwrap();
        assert!(root.is_dir());
        drop(location);
        assert!(!root.exists());
    }

    #[test]
    fn directory_reports_capacity() {
        let location = DirectoryLocation::temporary().unwrap();
        let capacity = location.capacity().unwrap();
        assert!(capacity.total >= capacity.available);
        assert!(location.is_valid());
    }

    #[test]
    fn memory_blobs_outlive_handles() {
        let location = MemoryLocation::new("remote");
        {
            let mut blob = location.create("ns", "blob").unwrap();
            blob.append(b"kept").unwrap();
        }
        let reopened = location.open("ns", "blob").unwrap();
        assert_eq!(reopened.read_at(0, 4).unwrap(), b"kept");
        assert_eq!(location.blob_count(), 1);
    }

    #[test]
    fn memory_delete_releases_capacity() {
        let location = MemoryLocation::new("remote").with_capacity(100);
        let mut blob = location.create("ns", "blob").unwrap();
        blob.append(&[0u8; 40]).unwrap();
        assert_eq!(location.capacity().unwrap().available, 60);

        blob.delete().unwrap();
        assert_eq!(location.capacity().unwrap().available, 100);
        assert!(location.list("ns").unwrap().is_empty());
    }

    #[test]
    fn memory_injected_failures() {
        let location = MemoryLocation::new("flaky");
        location.fail_next_creates(2);
        assert!(location.create("ns", "a").is_err());
        assert!(location.create("ns", "a").is_err());
        assert!(location.create("ns", "a").is_ok());
    }

    #[test]
    fn memory_invalid_location_refuses_creates() {
        let location = MemoryLocation::new("down");
        location.set_valid(false);
        assert!(!location.is_valid());
        assert!(matches!(
            location.create("ns", "a"),
            Err(StorageError::Unavailable(_))
        ));
    }

    #[test]
    fn memory_namespaces_are_distinct() {
        let location = MemoryLocation::new("remote");
        location.create("a", "x").unwrap();
        location.create("a", "y").unwrap();
        location.create("b", "x").unwrap();
        assert_eq!(location.namespaces().unwrap(), vec!["a", "b"]);
        assert_eq!(location.list("a").unwrap(), vec!["x", "y"]);
    }
}
