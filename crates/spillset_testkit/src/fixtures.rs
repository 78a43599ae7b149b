//! Test fixtures and set helpers.
//!
//! Provides convenience functions for building spilling sets together
//! with the storage they spill to.

use spillset_core::{BufferedSortedSet, ElementOrder, PersistOptions, SpillConfig};
use spillset_storage::{DirectoryLocation, MemoryLocation};
use std::path::Path;
use std::sync::Arc;

/// A small configuration that spills and compacts early.
///
/// Verification stays on so every spill is checked.
pub fn small_config(threshold: usize, max_files: usize) -> SpillConfig {
    SpillConfig::new()
        .buffer_persist_threshold(threshold)
        .max_open_files(max_files)
        .persist_options(PersistOptions::default())
}

/// A test set of `u32` with its location kept alive.
pub struct TestSet {
    /// The set instance.
    pub set: BufferedSortedSet<u32>,
    /// In-memory location, if the set spills to memory.
    pub memory: Option<Arc<MemoryLocation>>,
    /// Directory location, if the set spills to disk.
    pub directory: Option<Arc<DirectoryLocation>>,
}

impl TestSet {
    /// Creates a set spilling to a fresh in-memory location.
    pub fn memory(threshold: usize, max_files: usize) -> Self {
        let location = Arc::new(MemoryLocation::new("testkit"));
        let set = BufferedSortedSet::new(
            small_config(threshold, max_files),
            ElementOrder::natural(),
            location.clone(),
        )
        .expect("Failed to create in-memory set");
        Self {
            set,
            memory: Some(location),
            directory: None,
        }
    }

    /// Creates a set spilling to a temporary directory.
    pub fn directory(threshold: usize, max_files: usize) -> Self {
        let location =
            Arc::new(DirectoryLocation::temporary().expect("Failed to create temp directory"));
        let set = BufferedSortedSet::new(
            small_config(threshold, max_files),
            ElementOrder::natural(),
            location.clone(),
        )
        .expect("Failed to create directory set");
        Self {
            set,
            memory: None,
            directory: Some(location),
        }
    }

    /// Returns the spill directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.directory.as_ref().map(|location| location.root())
    }

    /// Blobs currently held by the in-memory location.
    pub fn blob_count(&self) -> Option<usize> {
        self.memory.as_ref().map(|location| location.blob_count())
    }
}

impl std::ops::Deref for TestSet {
    type Target = BufferedSortedSet<u32>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

impl std::ops::DerefMut for TestSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.set
    }
}

/// Runs a test with a set spilling to memory.
///
/// # Example
///
/// ```rust
/// use spillset_testkit::with_memory_set;
/// use spillset_core::SortedSet;
///
/// with_memory_set(2, 0, |set| {
///     set.insert(7).unwrap();
///     set.insert(3).unwrap();
///     assert_eq!(set.first().unwrap(), 3);
/// });
/// ```
pub fn with_memory_set<F, R>(threshold: usize, max_files: usize, f: F) -> R
where
    F: FnOnce(&mut BufferedSortedSet<u32>) -> R,
{
    let mut test_set = TestSet::memory(threshold, max_files);
    f(&mut test_set.set)
}

/// Runs a test with a set spilling to a temporary directory.
pub fn with_directory_set<F, R>(threshold: usize, max_files: usize, f: F) -> R
where
    F: FnOnce(&mut BufferedSortedSet<u32>, &Path) -> R,
{
    let mut test_set = TestSet::directory(threshold, max_files);
    let location = test_set
        .directory
        .clone()
        .expect("Directory set should have a location");
    f(&mut test_set.set, location.root())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use spillset_core::SortedSet;

    /// Inserts `batches` one after another, persisting after each.
    ///
    /// With a threshold above every batch size this leaves one segment per
    /// batch (subject to compaction).
    pub fn persisted_batches(test_set: &mut TestSet, batches: &[&[u32]]) {
        for batch in batches {
            for element in *batch {
                test_set
                    .set
                    .insert(*element)
                    .expect("Failed to insert element");
            }
            test_set.set.persist().expect("Failed to persist batch");
        }
    }

    /// A set holding `0..count` in segments of `threshold` elements.
    pub fn populated_set(count: u32, threshold: usize) -> TestSet {
        let mut test_set = TestSet::memory(threshold, 0);
        for element in 0..count {
            test_set
                .set
                .insert(element)
                .expect("Failed to populate set");
        }
        test_set
    }
}
