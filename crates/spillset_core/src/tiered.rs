//! Placement of new segments across prioritized storage locations.
//!
//! Every time a segment needs a blob, the candidates are walked in
//! ascending priority order. The first location that is valid, has not
//! been abandoned and has enough free capacity gets up to `1 + retries`
//! attempts to create and write the blob. A location that uses up its
//! attempts is abandoned for the rest of the set's lifetime.
//!
//! Only failures of the destination count against a location. A write
//! callback that fails for reasons of its own (for example an unreadable
//! compaction input) stops placement without touching any location.

use crate::error::{CoreError, CoreResult};
use crate::segment::{parse_segment_name, segment_name, SegmentHandle, SegmentId};
use spillset_storage::{Capacity, StoreLocation};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum free space a location must report to receive a new segment.
///
/// Both thresholds must hold.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MinAvailable {
    /// Minimum available bytes.
    pub bytes: u64,
    /// Minimum available fraction of total capacity (0.0 - 1.0).
    pub fraction: f64,
}

impl MinAvailable {
    /// No requirement.
    pub const NONE: Self = Self {
        bytes: 0,
        fraction: 0.0,
    };

    /// Requires at least `bytes` available.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self {
            bytes,
            fraction: 0.0,
        }
    }

    /// Requires at least `megabytes` MiB available.
    #[must_use]
    pub const fn megabytes(megabytes: u64) -> Self {
        Self::bytes(megabytes * 1024 * 1024)
    }

    /// Requires at least `fraction` of the total capacity available.
    #[must_use]
    pub const fn fraction(fraction: f64) -> Self {
        Self { bytes: 0, fraction }
    }

    /// Adds a fractional requirement to a byte requirement.
    #[must_use]
    pub const fn and_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction;
        self
    }

    /// Returns true if `capacity` satisfies both thresholds.
    pub fn is_met_by(&self, capacity: &Capacity) -> bool {
        capacity.available >= self.bytes && capacity.available_fraction() >= self.fraction
    }
}

/// A storage location offered to a set, with its priority and space
/// requirement. Lower priorities are tried first.
#[derive(Clone)]
pub struct CandidateLocation {
    /// The location.
    pub location: Arc<dyn StoreLocation>,
    /// Priority; lower is preferred.
    pub priority: u32,
    /// Free space required before a segment is placed here.
    pub min_available: MinAvailable,
}

impl fmt::Debug for CandidateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateLocation")
            .field("location", &self.location.describe())
            .field("priority", &self.priority)
            .field("min_available", &self.min_available)
            .finish()
    }
}

impl CandidateLocation {
    /// A candidate with priority 0 and no space requirement.
    pub fn new(location: Arc<dyn StoreLocation>) -> Self {
        Self {
            location,
            priority: 0,
            min_available: MinAvailable::NONE,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the space requirement.
    #[must_use]
    pub fn with_min_available(mut self, min_available: MinAvailable) -> Self {
        self.min_available = min_available;
        self
    }
}

struct Candidate {
    config: CandidateLocation,
    description: String,
    abandoned: bool,
}

/// Why a candidate was passed over.
#[derive(Debug, PartialEq)]
enum Skip {
    Abandoned,
    Invalid,
    LowCapacity,
}

impl Candidate {
    fn check(&self) -> Result<(), Skip> {
        if self.abandoned {
            return Err(Skip::Abandoned);
        }
        if !self.config.location.is_valid() {
            return Err(Skip::Invalid);
        }
        match self.config.location.capacity() {
            Ok(capacity) if self.config.min_available.is_met_by(&capacity) => Ok(()),
            Ok(capacity) => {
                debug!(
                    location = %self.description,
                    available = capacity.available,
                    total = capacity.total,
                    "location below minimum free space"
                );
                Err(Skip::LowCapacity)
            }
            Err(err) => {
                warn!(location = %self.description, error = %err, "capacity query failed");
                Err(Skip::Invalid)
            }
        }
    }
}

/// Chooses where each new segment blob of one set is stored.
pub struct TieredSelector {
    namespace: String,
    candidates: Vec<Candidate>,
    retries: u32,
    next_sequence: u64,
}

impl fmt::Debug for TieredSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locations: Vec<&str> = self
            .candidates
            .iter()
            .map(|candidate| candidate.description.as_str())
            .collect();
        f.debug_struct("TieredSelector")
            .field("namespace", &self.namespace)
            .field("locations", &locations)
            .field("retries", &self.retries)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl TieredSelector {
    /// Creates a selector placing blobs under `namespace`.
    ///
    /// Candidates are ordered by ascending priority; equal priorities keep
    /// their given order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if no candidate is given.
    pub fn new(
        namespace: impl Into<String>,
        mut candidates: Vec<CandidateLocation>,
        retries: u32,
    ) -> CoreResult<Self> {
        if candidates.is_empty() {
            return Err(CoreError::invalid_config(
                "at least one candidate location is required",
            ));
        }
        candidates.sort_by_key(|candidate| candidate.priority);
        Ok(Self {
            namespace: namespace.into(),
            candidates: candidates
                .into_iter()
                .map(|config| Candidate {
                    description: config.location.describe(),
                    config,
                    abandoned: false,
                })
                .collect(),
            retries,
            next_sequence: 1,
        })
    }

    /// The namespace all blobs are created in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Descriptions of locations abandoned after exhausting their retries.
    pub fn abandoned(&self) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.abandoned)
            .map(|candidate| candidate.description.clone())
            .collect()
    }

    /// Creates a blob for a newly spilled segment at the best eligible
    /// location and hands it to `write`. The segment gets the next
    /// sequence number.
    ///
    /// See [`place_as`](Self::place_as) for the failure handling.
    pub fn place(
        &mut self,
        write: &mut dyn FnMut(SegmentHandle) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let id = SegmentId::new(self.next_sequence);
        self.next_sequence += 1;
        self.place_as(id, write)
    }

    /// Creates a blob for the segment `id` at the best eligible location
    /// and hands it to `write`.
    ///
    /// `write` takes ownership of the handle; if it fails it is expected to
    /// release the handle. Failures of the store are retried and then move
    /// on to the next location; any other failure is returned at once.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CapacityExhausted`] if no location qualified at all
    /// - [`CoreError::PersistFailed`] wrapping the last failure if every
    ///   qualifying location was tried and abandoned
    pub fn place_as(
        &mut self,
        id: SegmentId,
        write: &mut dyn FnMut(SegmentHandle) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let name = segment_name(id);

        let mut attempts = 0u32;
        let mut last_error: Option<CoreError> = None;

        for candidate in &mut self.candidates {
            match candidate.check() {
                Ok(()) => {}
                Err(skip) => {
                    debug!(location = %candidate.description, reason = ?skip, "skipping location");
                    continue;
                }
            }

            for attempt in 0..=self.retries {
                attempts += 1;
                let backend = match candidate.config.location.create(&self.namespace, &name) {
                    Ok(backend) => backend,
                    Err(err) => {
                        warn!(
                            location = %candidate.description,
                            segment = %name,
                            attempt,
                            error = %err,
                            "failed to create segment blob"
                        );
                        last_error = Some(err.into());
                        continue;
                    }
                };

                let handle = SegmentHandle::new(backend, candidate.description.clone(), id);
                match write(handle) {
                    Ok(()) => {
                        debug!(location = %candidate.description, segment = %name, "placed segment");
                        return Ok(());
                    }
                    Err(err) if err.is_storage_failure() => {
                        warn!(
                            location = %candidate.description,
                            segment = %name,
                            attempt,
                            error = %err,
                            "failed to write segment"
                        );
                        last_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }

            warn!(
                location = %candidate.description,
                attempts = self.retries + 1,
                "abandoning location for the rest of this set's lifetime"
            );
            candidate.abandoned = true;
        }

        match last_error {
            Some(err) => Err(CoreError::PersistFailed {
                attempts,
                source: Box::new(err),
            }),
            None => Err(CoreError::CapacityExhausted {
                candidates: self.candidates.len(),
            }),
        }
    }

    /// Opens every segment blob this set left in any location.
    ///
    /// Handles are returned oldest first by [`SegmentId`], so compaction
    /// outputs keep the position of their inputs. Later placements continue
    /// numbering after the highest sequence found. Names that do not look
    /// like segment blobs are ignored. Invalid locations are skipped.
    pub fn discover(&mut self) -> CoreResult<Vec<SegmentHandle>> {
        let mut found = Vec::new();
        for candidate in &self.candidates {
            if !candidate.config.location.is_valid() {
                warn!(location = %candidate.description, "skipping invalid location during recovery");
                continue;
            }
            for name in candidate.config.location.list(&self.namespace)? {
                let Some(id) = parse_segment_name(&name) else {
                    debug!(location = %candidate.description, blob = %name, "ignoring foreign blob");
                    continue;
                };
                let backend = candidate.config.location.open(&self.namespace, &name)?;
                found.push(SegmentHandle::new(
                    backend,
                    candidate.description.clone(),
                    id,
                ));
                self.next_sequence = self.next_sequence.max(id.sequence + 1);
            }
        }
        found.sort_by_key(SegmentHandle::id);
        info!(
            namespace = %self.namespace,
            segments = found.len(),
            "recovered spilled segments"
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillset_storage::MemoryLocation;

    fn memory(label: &str) -> Arc<MemoryLocation> {
        Arc::new(MemoryLocation::new(label))
    }

    fn write_ok(handle: SegmentHandle) -> CoreResult<()> {
        drop(handle);
        Ok(())
    }

    #[test]
    fn prefers_lowest_priority_value() {
        let low = memory("low");
        let high = memory("high");
        let mut selector = TieredSelector::new(
            "set",
            vec![
                CandidateLocation::new(high.clone()).with_priority(5),
                CandidateLocation::new(low.clone()).with_priority(1),
            ],
            0,
        )
        .unwrap();

        selector.place(&mut write_ok).unwrap();
        assert_eq!(low.blob_count(), 1);
        assert_eq!(high.blob_count(), 0);
    }

    #[test]
    fn skips_locations_without_space() {
        let small = Arc::new(MemoryLocation::new("small").with_capacity(100));
        let large = memory("large");
        let mut selector = TieredSelector::new(
            "set",
            vec![
                CandidateLocation::new(small.clone()).with_min_available(MinAvailable::bytes(1000)),
                CandidateLocation::new(large.clone()).with_priority(1),
            ],
            0,
        )
        .unwrap();

        selector.place(&mut write_ok).unwrap();
        selector.place(&mut write_ok).unwrap();
        assert_eq!(small.blob_count(), 0);
        assert_eq!(large.blob_count(), 2);
    }

    #[test]
    fn fraction_requirement_is_checked() {
        let half_full = Arc::new(MemoryLocation::new("half").with_capacity(10));
        half_full.create("other", "filler").unwrap().append(&[0u8; 5]).unwrap();
        let requirement = MinAvailable::bytes(1).and_fraction(0.6);
        assert!(!requirement.is_met_by(&half_full.capacity().unwrap()));
        assert!(MinAvailable::fraction(0.5).is_met_by(&half_full.capacity().unwrap()));
    }

    #[test]
    fn capacity_exhausted_when_nothing_qualifies() {
        let small = Arc::new(MemoryLocation::new("small").with_capacity(10));
        let mut selector = TieredSelector::new(
            "set",
            vec![CandidateLocation::new(small).with_min_available(MinAvailable::megabytes(1))],
            2,
        )
        .unwrap();

        assert!(matches!(
            selector.place(&mut write_ok),
            Err(CoreError::CapacityExhausted { candidates: 1 })
        ));
    }

    #[test]
    fn retries_then_succeeds_on_same_location() {
        let flaky = memory("flaky");
        flaky.fail_next_creates(2);
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(flaky.clone())], 2).unwrap();

        selector.place(&mut write_ok).unwrap();
        assert_eq!(flaky.blob_count(), 1);
        assert!(selector.abandoned().is_empty());
    }

    #[test]
    fn abandons_location_after_retry_budget() {
        let broken = memory("broken");
        let backup = memory("backup");
        broken.fail_next_creates(10);
        let mut selector = TieredSelector::new(
            "set",
            vec![
                CandidateLocation::new(broken.clone()),
                CandidateLocation::new(backup.clone()).with_priority(1),
            ],
            1,
        )
        .unwrap();

        selector.place(&mut write_ok).unwrap();
        assert_eq!(backup.blob_count(), 1);
        assert_eq!(selector.abandoned(), vec![broken.describe()]);

        broken.fail_next_creates(0);
        selector.place(&mut write_ok).unwrap();
        assert_eq!(broken.blob_count(), 0);
        assert_eq!(backup.blob_count(), 2);
    }

    #[test]
    fn persist_failed_after_every_location_gives_up() {
        let broken = memory("broken");
        broken.fail_next_creates(100);
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(broken)], 2).unwrap();

        match selector.place(&mut write_ok) {
            Err(CoreError::PersistFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected PersistFailed, got {other:?}"),
        }
        assert!(matches!(
            selector.place(&mut write_ok),
            Err(CoreError::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn write_failures_count_against_retries() {
        let location = memory("mem");
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(location.clone())], 1).unwrap();

        let mut calls = 0;
        let mut failing_once = |handle: SegmentHandle| -> CoreResult<()> {
            calls += 1;
            if calls == 1 {
                handle.release()?;
                Err(CoreError::verification_failed("spill", "size"))
            } else {
                drop(handle);
                Ok(())
            }
        };
        selector.place(&mut failing_once).unwrap();
        assert_eq!(calls, 2);
        assert_eq!(location.blob_count(), 1);
    }

    #[test]
    fn programmer_errors_are_not_retried() {
        let location = memory("mem");
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(location)], 5).unwrap();

        let mut calls = 0;
        let mut immutable = |handle: SegmentHandle| -> CoreResult<()> {
            calls += 1;
            drop(handle);
            Err(CoreError::immutable("persisted"))
        };
        assert!(matches!(
            selector.place(&mut immutable),
            Err(CoreError::Immutable { .. })
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn failures_of_the_writer_leave_the_location_eligible() {
        let location = memory("mem");
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(location.clone())], 3).unwrap();

        let mut calls = 0;
        let mut unreadable_input = |handle: SegmentHandle| -> CoreResult<()> {
            calls += 1;
            handle.release()?;
            Err(CoreError::compaction_input(CoreError::ChecksumMismatch {
                expected: 1,
                actual: 2,
            }))
        };
        assert!(matches!(
            selector.place_as(SegmentId::new(1).next_generation(), &mut unreadable_input),
            Err(CoreError::CompactionInput { .. })
        ));
        assert_eq!(calls, 1);
        assert!(selector.abandoned().is_empty());
        assert_eq!(location.blob_count(), 0);

        selector.place(&mut write_ok).unwrap();
        assert_eq!(location.blob_count(), 1);
    }

    #[test]
    fn place_as_uses_the_given_id() {
        let location = memory("mem");
        let mut selector =
            TieredSelector::new("set", vec![CandidateLocation::new(location.clone())], 0).unwrap();
        let merged = SegmentId::new(1).next_generation();

        let mut placed = Vec::new();
        let mut record = |handle: SegmentHandle| -> CoreResult<()> {
            placed.push(handle.name().to_string());
            Ok(())
        };
        selector.place_as(merged, &mut record).unwrap();
        selector.place(&mut record).unwrap();
        assert_eq!(placed, vec!["spill-00000001-0001.seg", "spill-00000001.seg"]);
    }

    #[test]
    fn invalid_locations_are_skipped() {
        let offline = memory("offline");
        let online = memory("online");
        offline.set_valid(false);
        let mut selector = TieredSelector::new(
            "set",
            vec![
                CandidateLocation::new(offline.clone()),
                CandidateLocation::new(online.clone()).with_priority(1),
            ],
            0,
        )
        .unwrap();

        selector.place(&mut write_ok).unwrap();
        assert_eq!(online.blob_count(), 1);
        assert!(selector.abandoned().is_empty());
    }

    #[test]
    fn discover_continues_numbering() {
        let first = memory("first");
        let second = memory("second");
        let merged = SegmentId::new(2).next_generation();
        first.create("set", &segment_name(SegmentId::new(4))).unwrap();
        second.create("set", &segment_name(SegmentId::new(9))).unwrap();
        second.create("set", &segment_name(merged)).unwrap();
        second.create("set", "notes.txt").unwrap();
        second.create("other-set", &segment_name(SegmentId::new(50))).unwrap();

        let mut selector = TieredSelector::new(
            "set",
            vec![
                CandidateLocation::new(first.clone()),
                CandidateLocation::new(second.clone()),
            ],
            0,
        )
        .unwrap();
        let found = selector.discover().unwrap();
        let ids: Vec<SegmentId> = found.iter().map(SegmentHandle::id).collect();
        assert_eq!(ids, vec![merged, SegmentId::new(4), SegmentId::new(9)]);

        let mut placed = None;
        selector
            .place(&mut |handle: SegmentHandle| {
                placed = Some(handle.sequence());
                Ok(())
            })
            .unwrap();
        assert_eq!(placed, Some(10));
    }

    #[test]
    fn requires_a_candidate() {
        assert!(matches!(
            TieredSelector::new("set", Vec::new(), 0),
            Err(CoreError::InvalidConfig { .. })
        ));
    }
}
