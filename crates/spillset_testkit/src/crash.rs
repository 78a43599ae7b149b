//! Crash testing for spilled sets.
//!
//! Two kinds of crash are simulated:
//!
//! 1. **Crash during a spill** - a [`CrashingLocation`] hands out backends
//!    that fail part-way through a write, exercising retries and cleanup.
//! 2. **Crash before a segment was finished** - [`damage_segment`] cuts a
//!    segment file short the way an interrupted write would, and the
//!    [`CrashRecoveryHarness`] checks that recovery keeps every other
//!    segment.
//!
//! ## Usage
//!
//! ```rust
//! use spillset_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let harness = CrashRecoveryHarness::new(dir.path());
//! let result = harness.run(&[vec![1, 2], vec![3, 4]], CrashPoint::MissingTrailer);
//! assert!(result.passed, "{result:?}");
//! ```

use spillset_core::{BufferedSortedSet, CandidateLocation, ElementOrder, SortedSet};
use spillset_storage::{
    Capacity, DirectoryLocation, StorageBackend, StorageError, StorageResult, StoreLocation,
};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::fixtures::small_config;

/// How an interrupted write left a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Nothing was written after the blob was created.
    EmptyBlob,
    /// Only part of the header reached the disk.
    PartialHeader,
    /// The last record was cut short.
    TornRecord,
    /// Every record was written but the trailer was not.
    MissingTrailer,
}

impl CrashPoint {
    /// All crash points.
    pub const ALL: [Self; 4] = [
        Self::EmptyBlob,
        Self::PartialHeader,
        Self::TornRecord,
        Self::MissingTrailer,
    ];

    fn surviving_len(self, len: u64) -> u64 {
        match self {
            Self::EmptyBlob => 0,
            Self::PartialHeader => len.min(4),
            Self::TornRecord => len.saturating_sub(15),
            Self::MissingTrailer => len.saturating_sub(12),
        }
    }
}

/// Cuts the segment file at `path` short as a crash at `point` would.
pub fn damage_segment(path: &Path, point: CrashPoint) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    file.set_len(point.surviving_len(len))?;
    file.sync_all()
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Elements expected after recovery.
    pub expected_elements: usize,
    /// Elements found after recovery.
    pub actual_elements: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, elements: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_elements: elements,
            actual_elements: elements,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_elements: expected,
            actual_elements: actual,
            error: Some(error.to_string()),
        }
    }
}

/// A storage backend wrapper that can simulate crashes.
#[derive(Debug)]
pub struct CrashingBackend {
    inner: Box<dyn StorageBackend>,
    crash_after_bytes: usize,
    bytes_written: usize,
    crashed: AtomicBool,
}

impl CrashingBackend {
    /// Wraps `inner`, failing once more than `crash_after_bytes` are appended.
    ///
    /// The bytes up to the crash point still reach `inner`.
    pub fn new(inner: Box<dyn StorageBackend>, crash_after_bytes: usize) -> Self {
        Self {
            inner,
            crash_after_bytes,
            bytes_written: 0,
            crashed: AtomicBool::new(false),
        }
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
    }
}

impl StorageBackend for CrashingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.has_crashed() {
            return Err(self.crash("write after crash"));
        }
        let remaining = self.crash_after_bytes.saturating_sub(self.bytes_written);
        if data.len() > remaining {
            if remaining > 0 {
                let _ = self.inner.append(&data[..remaining]);
            }
            self.bytes_written += remaining;
            return Err(self.crash("partial write"));
        }
        self.bytes_written += data.len();
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn delete(&mut self) -> StorageResult<()> {
        self.inner.delete()
    }

    fn is_deleted(&self) -> bool {
        self.inner.is_deleted()
    }
}

/// A location whose next few blobs crash part-way through being written.
#[derive(Debug)]
pub struct CrashingLocation {
    inner: Arc<dyn StoreLocation>,
    crashes_left: AtomicU32,
    crash_after_bytes: AtomicUsize,
}

impl CrashingLocation {
    /// Wraps `inner` with no crashes armed.
    pub fn new(inner: Arc<dyn StoreLocation>) -> Self {
        Self {
            inner,
            crashes_left: AtomicU32::new(0),
            crash_after_bytes: AtomicUsize::new(usize::MAX),
        }
    }

    /// Makes the next `count` created blobs crash after `after_bytes`.
    pub fn crash_next(&self, count: u32, after_bytes: usize) {
        self.crash_after_bytes.store(after_bytes, Ordering::SeqCst);
        self.crashes_left.store(count, Ordering::SeqCst);
    }

    /// Crashes still armed.
    pub fn crashes_left(&self) -> u32 {
        self.crashes_left.load(Ordering::SeqCst)
    }
}

impl StoreLocation for CrashingLocation {
    fn describe(&self) -> String {
        format!("crashing({})", self.inner.describe())
    }

    fn create(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = self.inner.create(namespace, name)?;
        let armed = self
            .crashes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if armed {
            let after = self.crash_after_bytes.load(Ordering::SeqCst);
            Ok(Box::new(CrashingBackend::new(backend, after)))
        } else {
            Ok(backend)
        }
    }

    fn open(&self, namespace: &str, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        self.inner.open(namespace, name)
    }

    fn list(&self, namespace: &str) -> StorageResult<Vec<String>> {
        self.inner.list(namespace)
    }

    fn namespaces(&self) -> StorageResult<Vec<String>> {
        self.inner.namespaces()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn capacity(&self) -> StorageResult<Capacity> {
        self.inner.capacity()
    }
}

/// Test harness for crash recovery scenarios.
#[derive(Debug)]
pub struct CrashRecoveryHarness {
    /// Directory the sets spill to.
    pub root: PathBuf,
}

impl CrashRecoveryHarness {
    /// Creates a harness spilling into `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Spills each batch into its own segment, damages the newest segment
    /// at `point`, recovers the set and checks that exactly the elements
    /// of the other batches survived.
    pub fn run(&self, batches: &[Vec<u32>], point: CrashPoint) -> CrashRecoveryResult {
        let description = format!("{point:?} in segment {} of {}", batches.len(), batches.len());
        match self.try_run(batches, point) {
            Ok((expected, actual)) if expected == actual => {
                CrashRecoveryResult::pass(&description, actual.len())
            }
            Ok((expected, actual)) => CrashRecoveryResult::fail(
                &description,
                expected.len(),
                actual.len(),
                &format!("expected {expected:?}, recovered {actual:?}"),
            ),
            Err(err) => CrashRecoveryResult::fail(&description, 0, 0, &err),
        }
    }

    fn try_run(
        &self,
        batches: &[Vec<u32>],
        point: CrashPoint,
    ) -> Result<(Vec<u32>, Vec<u32>), String> {
        let location: Arc<dyn StoreLocation> =
            Arc::new(DirectoryLocation::open(&self.root).map_err(|e| e.to_string())?);
        let config = small_config(usize::MAX, 0);

        let mut set = BufferedSortedSet::new(config.clone(), ElementOrder::natural(), location.clone())
            .map_err(|e| e.to_string())?;
        for batch in batches {
            set.insert_all(batch.iter().copied()).map_err(|e| e.to_string())?;
            set.persist().map_err(|e| e.to_string())?;
        }
        let victim = set
            .segments()
            .last()
            .map(|info| self.root.join(set.id().to_string()).join(&info.name))
            .ok_or_else(|| "no segment was spilled".to_string())?;
        let id = set.id();
        drop(set);

        damage_segment(&victim, point).map_err(|e| e.to_string())?;

        let recovered = BufferedSortedSet::<u32>::recover(
            id,
            config,
            ElementOrder::natural(),
            vec![CandidateLocation::new(location)],
        )
        .map_err(|e| e.to_string())?;
        let actual = recovered.to_vec().map_err(|e| e.to_string())?;

        let survivors = batches.len().saturating_sub(1);
        let expected: BTreeSet<u32> = batches[..survivors].iter().flatten().copied().collect();
        Ok((expected.into_iter().collect(), actual))
    }
}
