//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod sort;
pub mod verify;

use serde::Serialize;
use spillset_core::segment::{inspect_segment, parse_segment_name};
use spillset_core::{CandidateLocation, ElementOrder, MinAvailable};
use spillset_storage::{DirectoryLocation, StoreLocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs at least one `--location`.
    #[error("at least one --location is required for {command}")]
    NoLocations {
        /// Command that was run.
        command: &'static str,
    },

    /// A sort that keeps its segments needs a real directory.
    #[error("--keep requires an explicit --location")]
    KeepWithoutLocation,

    /// Unsupported output format.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// The requested set has no segments in any location.
    #[error("no segments found for set {0}")]
    SetNotFound(String),

    /// Verification found damaged segments.
    #[error("verification failed: {corrupt} of {checked} segments are damaged")]
    VerificationFailed {
        /// Segments checked.
        checked: usize,
        /// Segments that failed a check.
        corrupt: usize,
    },
}

/// Ordering used for text lines.
pub(crate) fn line_order(reverse: bool) -> ElementOrder<String> {
    if reverse {
        ElementOrder::natural().reversed()
    } else {
        ElementOrder::natural()
    }
}

/// Opens every directory as a candidate, in the order given.
pub(crate) fn open_candidates(
    paths: &[PathBuf],
    min_free_mb: u64,
) -> Result<Vec<CandidateLocation>, Box<dyn std::error::Error>> {
    let mut candidates = Vec::with_capacity(paths.len());
    for (priority, path) in paths.iter().enumerate() {
        let location: Arc<dyn StoreLocation> = Arc::new(DirectoryLocation::open(path)?);
        candidates.push(
            CandidateLocation::new(location)
                .with_priority(u32::try_from(priority).unwrap_or(u32::MAX))
                .with_min_available(MinAvailable::megabytes(min_free_mb)),
        );
    }
    Ok(candidates)
}

/// Per-location scan result.
#[derive(Debug, Serialize)]
pub struct LocationReport {
    /// Directory path.
    pub path: String,
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Available capacity in bytes.
    pub available_bytes: u64,
    /// Sets with at least one blob here.
    pub sets: Vec<SetReport>,
}

/// A set's blobs within one location.
#[derive(Debug, Serialize)]
pub struct SetReport {
    /// Set id (namespace).
    pub id: String,
    /// Segment blobs, oldest first.
    pub segments: Vec<SegmentReport>,
}

impl SetReport {
    /// Elements across readable segments.
    pub fn elements(&self) -> u64 {
        self.segments.iter().filter_map(|s| s.elements).sum()
    }

    /// Bytes across all segments.
    pub fn bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }
}

/// One segment blob.
#[derive(Debug, Serialize)]
pub struct SegmentReport {
    /// Blob name.
    pub name: String,
    /// Sequence number parsed from the name.
    pub sequence: u64,
    /// Compaction generation parsed from the name.
    pub generation: u32,
    /// Blob size in bytes.
    pub bytes: u64,
    /// Element count, if the segment is intact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<u64>,
    /// Why the segment failed its checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Walks a location, checking every segment blob it holds.
///
/// Blobs whose names are not segment names are ignored.
pub(crate) fn scan_location(
    path: &Path,
    only_set: Option<&str>,
) -> Result<LocationReport, Box<dyn std::error::Error>> {
    let location = DirectoryLocation::open(path)?;
    let capacity = location.capacity()?;
    let mut sets = Vec::new();

    for namespace in location.namespaces()? {
        if only_set.is_some_and(|wanted| wanted != namespace) {
            continue;
        }
        let mut segments = Vec::new();
        for name in location.list(&namespace)? {
            let Some(id) = parse_segment_name(&name) else {
                continue;
            };
            let backend = location.open(&namespace, &name)?;
            let bytes = backend.size()?;
            let (elements, error) = match inspect_segment(backend.as_ref()) {
                Ok(summary) => (Some(summary.elements), None),
                Err(err) => (None, Some(err.to_string())),
            };
            segments.push(SegmentReport {
                name,
                sequence: id.sequence,
                generation: id.generation,
                bytes,
                elements,
                error,
            });
        }
        if segments.is_empty() {
            continue;
        }
        segments.sort_by_key(|segment| (segment.sequence, segment.generation));
        sets.push(SetReport {
            id: namespace,
            segments,
        });
    }

    Ok(LocationReport {
        path: path.display().to_string(),
        total_bytes: capacity.total,
        available_bytes: capacity.available,
        sets,
    })
}

/// Human-readable byte size.
pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
