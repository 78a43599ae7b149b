//! The buffered multi-segment set.
//!
//! Inserts accumulate in an in-memory buffer segment. When the buffer
//! reaches the configured threshold it is spilled: written to a new blob
//! chosen by the [`TieredSelector`] and appended to the list of spilled
//! segments. `persist()` additionally compacts the oldest segments until
//! no more than `max_open_files` remain.
//!
//! Spilled segments may hold elements that are duplicates of each other
//! under the set's order. Reads resolve them with a deduplicating merge;
//! compaction resolves them for good.

use crate::composite::CompositeView;
use crate::config::SpillConfig;
use crate::cursor::{BoxCursor, SetIter};
use crate::error::{CoreError, CoreResult};
use crate::merge::KWayMerge;
use crate::order::{Element, ElementOrder, RewriteStrategy, SharedRewrite};
use crate::range::KeyRange;
use crate::segment::{OrderedSegment, SegmentHandle, SegmentId};
use crate::set::{pick_extreme, BoxSet, SortedSet};
use crate::tiered::{CandidateLocation, TieredSelector};
use spillset_storage::StoreLocation;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where one spilled segment lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Blob name.
    pub name: String,
    /// Description of the location holding the blob.
    pub location: String,
    /// Position of the segment in the age order of the set.
    pub id: SegmentId,
    /// False while the segment is loaded after a failed rewrite.
    pub persisted: bool,
}

/// A sorted set that spills to prioritized storage locations.
///
/// # Example
///
/// ```rust
/// use spillset_core::{BufferedSortedSet, ElementOrder, SortedSet, SpillConfig};
/// use spillset_storage::MemoryLocation;
/// use std::sync::Arc;
///
/// let config = SpillConfig::new().buffer_persist_threshold(2);
/// let location = Arc::new(MemoryLocation::new("scratch"));
/// let mut set = BufferedSortedSet::new(config, ElementOrder::natural(), location).unwrap();
///
/// for n in [5u32, 1, 4, 2, 3] {
///     set.insert(n).unwrap();
/// }
/// assert_eq!(set.segment_count(), 2);
/// assert_eq!(set.to_vec().unwrap(), vec![1, 2, 3, 4, 5]);
/// ```
pub struct BufferedSortedSet<E: Element> {
    id: Uuid,
    config: SpillConfig,
    order: ElementOrder<E>,
    rewrite: Option<SharedRewrite<E>>,
    buffer: OrderedSegment<E>,
    spilled: Vec<OrderedSegment<E>>,
    selector: TieredSelector,
    full: KeyRange<E>,
}

impl<E: Element> std::fmt::Debug for BufferedSortedSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSortedSet")
            .field("id", &self.id)
            .field("buffer", &self.buffer.in_memory_len())
            .field("segments", &self.spilled.len())
            .field("selector", &self.selector)
            .finish()
    }
}

impl<E: Element> BufferedSortedSet<E> {
    /// Creates an empty set spilling to a single location.
    pub fn new(
        config: SpillConfig,
        order: ElementOrder<E>,
        location: Arc<dyn StoreLocation>,
    ) -> CoreResult<Self> {
        Self::with_locations(config, order, vec![CandidateLocation::new(location)])
    }

    /// Creates an empty set spilling to prioritized candidate locations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for an invalid configuration or
    /// an empty candidate list.
    pub fn with_locations(
        config: SpillConfig,
        order: ElementOrder<E>,
        candidates: Vec<CandidateLocation>,
    ) -> CoreResult<Self> {
        Self::build(Uuid::new_v4(), config, order, candidates)
    }

    /// Reopens the set with the given id from whatever segments it left in
    /// the candidate locations.
    ///
    /// Blobs that are not complete segments (for example because the
    /// process died mid-write) are skipped with a warning and left in place.
    pub fn recover(
        id: Uuid,
        config: SpillConfig,
        order: ElementOrder<E>,
        candidates: Vec<CandidateLocation>,
    ) -> CoreResult<Self> {
        let mut set = Self::build(id, config, order, candidates)?;
        for handle in set.selector.discover()? {
            let name = handle.name().to_string();
            match OrderedSegment::open(handle, set.order.clone()) {
                Ok(segment) => set.spilled.push(
                    segment.with_persist_options(set.config.persist_options.clone()),
                ),
                Err(err @ (CoreError::SegmentCorruption { .. } | CoreError::ChecksumMismatch { .. })) => {
                    warn!(set = %id, segment = %name, error = %err, "skipping incomplete segment");
                }
                Err(err) => return Err(err),
            }
        }
        info!(set = %id, segments = set.spilled.len(), "recovered set");
        Ok(set)
    }

    fn build(
        id: Uuid,
        config: SpillConfig,
        order: ElementOrder<E>,
        candidates: Vec<CandidateLocation>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let selector = TieredSelector::new(id.to_string(), candidates, config.retries)?;
        let buffer = OrderedSegment::new(order.clone())
            .with_persist_options(config.persist_options.clone());
        Ok(Self {
            id,
            config,
            order,
            rewrite: None,
            buffer,
            spilled: Vec::new(),
            selector,
            full: KeyRange::full(),
        })
    }

    /// Sets the strategy deciding between duplicates.
    #[must_use]
    pub fn with_rewrite<R>(mut self, strategy: R) -> Self
    where
        R: RewriteStrategy<E> + 'static,
    {
        let shared: SharedRewrite<E> = Arc::new(strategy);
        self.rewrite = Some(Arc::clone(&shared));
        self.buffer.set_rewrite(Some(Arc::clone(&shared)));
        for segment in &mut self.spilled {
            segment.set_rewrite(Some(Arc::clone(&shared)));
        }
        self
    }

    /// The set's identifier; also the namespace of its blobs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The configuration the set was built with.
    pub fn config(&self) -> &SpillConfig {
        &self.config
    }

    /// Number of elements in the in-memory buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.in_memory_len()
    }

    /// Number of spilled segments.
    pub fn segment_count(&self) -> usize {
        self.spilled.len()
    }

    /// Returns true if any segment has been spilled.
    pub fn has_persisted_data(&self) -> bool {
        !self.spilled.is_empty()
    }

    /// Returns true if nothing is held only in memory.
    pub fn is_persisted(&self) -> bool {
        self.buffer.in_memory_len() == 0 && self.spilled.iter().all(OrderedSegment::is_persisted)
    }

    /// Where each spilled segment lives, oldest first.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.spilled
            .iter()
            .filter_map(|segment| {
                segment.handle().map(|handle| SegmentInfo {
                    name: handle.name().to_string(),
                    location: handle.location().to_string(),
                    id: handle.id(),
                    persisted: segment.is_persisted(),
                })
            })
            .collect()
    }

    /// Locations given up on after exhausting their retries.
    pub fn abandoned_locations(&self) -> Vec<String> {
        self.selector.abandoned()
    }

    fn fresh_buffer(&self) -> OrderedSegment<E> {
        OrderedSegment::new(self.order.clone())
            .with_rewrite(self.rewrite.clone())
            .with_persist_options(self.config.persist_options.clone())
    }

    /// Inserts every element, then spills if the buffer is full.
    pub fn insert_all<I: IntoIterator<Item = E>>(&mut self, elements: I) -> CoreResult<bool> {
        let changed = self.buffer.insert_all(elements)?;
        self.spill_if_full()?;
        Ok(changed)
    }

    /// Removes every listed element from the buffer and every segment.
    pub fn remove_all(&mut self, elements: &[E]) -> CoreResult<bool> {
        self.edit_all(|segment| segment.remove_all(elements))
    }

    /// Keeps only elements matching `keep`.
    pub fn retain<F: FnMut(&E) -> bool>(&mut self, mut keep: F) -> CoreResult<bool> {
        self.edit_all(|segment| segment.retain(&mut keep))
    }

    /// Removes elements matching `predicate`.
    pub fn remove_if<F: FnMut(&E) -> bool>(&mut self, mut predicate: F) -> CoreResult<bool> {
        self.edit_all(|segment| segment.remove_if(&mut predicate))
    }

    /// Spills a non-empty buffer, then compacts down to `max_open_files`.
    ///
    /// Segments left in memory by an earlier failed rewrite are written
    /// back first.
    pub fn persist(&mut self) -> CoreResult<()> {
        for segment in &mut self.spilled {
            segment.persist()?;
        }
        self.spill()?;
        self.compact(self.config.max_open_files)?;
        Ok(())
    }

    /// Merges the oldest segments until at most `max_files` remain.
    ///
    /// Each round merges `min(excess + 1, max_files)` segments into one,
    /// which takes the place of the oldest. Zero means unbounded. Returns
    /// the number of merge rounds.
    pub fn compact(&mut self, max_files: usize) -> CoreResult<usize> {
        if max_files == 0 {
            return Ok(0);
        }
        let max_files = max_files.max(2);
        let mut rounds = 0;
        while self.spilled.len() > max_files {
            let excess = self.spilled.len() - max_files;
            self.merge_oldest((excess + 1).min(max_files))?;
            rounds += 1;
        }
        Ok(rounds)
    }

    /// Releases every spilled segment and empties the buffer.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.buffer = self.fresh_buffer();
        let segments = std::mem::take(&mut self.spilled);
        release_all(segments)
    }

    /// A live view of the elements inside `range`.
    ///
    /// Inserts through the view go to the buffer; removals reload and
    /// rewrite persisted segments as [`SortedSet::remove`] does. The buffer
    /// is not spilled by inserts made through a view.
    pub fn view(&mut self, range: KeyRange<E>) -> CoreResult<CompositeView<'_, E>> {
        let mut view = CompositeView::new(self.order.clone())
            .with_rewrite(self.rewrite.clone())
            .with_range(range.clone())?;
        for segment in &mut self.spilled {
            view.push(Box::new(segment.view(range.clone(), true)));
        }
        let target = view.push(Box::new(self.buffer.view(range, true)));
        view.set_insert_target(target)?;
        Ok(view)
    }

    fn spill_if_full(&mut self) -> CoreResult<()> {
        if self.buffer.in_memory_len() >= self.config.buffer_persist_threshold {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> CoreResult<()> {
        if self.buffer.in_memory_len() == 0 {
            return Ok(());
        }
        let start = Instant::now();
        let fresh = self.fresh_buffer();
        let mut segment = std::mem::replace(&mut self.buffer, fresh);
        let elements = segment.in_memory_len();

        match self
            .selector
            .place(&mut |handle: SegmentHandle| segment.persist_to(handle))
        {
            Ok(()) => {
                self.spilled.push(segment);
                debug!(
                    set = %self.id,
                    elements,
                    segments = self.spilled.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "spilled buffer"
                );
                Ok(())
            }
            Err(err) => {
                self.buffer = segment;
                Err(err)
            }
        }
    }

    /// Merges the `take` oldest segments into one that takes their place.
    ///
    /// The output inherits the position of the oldest input, so the order
    /// duplicates are resolved in survives recovery. Failures reading an
    /// input are reported as [`CoreError::CompactionInput`] and never count
    /// against the destination location.
    fn merge_oldest(&mut self, take: usize) -> CoreResult<()> {
        let start = Instant::now();
        let Self {
            id,
            config,
            order,
            rewrite,
            spilled,
            selector,
            ..
        } = self;

        let inputs = &spilled[..take];
        let target = inputs
            .first()
            .and_then(OrderedSegment::handle)
            .map(|handle| handle.id().next_generation())
            .ok_or_else(|| CoreError::invalid_operation("compaction input has no backing blob"))?;

        let mut opened = Some(open_inputs(inputs)?);
        let mut merged: Option<OrderedSegment<E>> = None;
        selector.place_as(target, &mut |handle: SegmentHandle| {
            let sources = match opened.take() {
                Some(sources) => sources,
                None => match open_inputs(inputs) {
                    Ok(sources) => sources,
                    Err(err) => {
                        handle.discard();
                        return Err(err);
                    }
                },
            };
            let merge = KWayMerge::deduplicating(sources, order.clone(), rewrite.clone())
                .map(|element| element.map_err(CoreError::compaction_input));
            let segment = OrderedSegment::write_sorted(
                merge,
                handle,
                order.clone(),
                config.persist_options.clone(),
            )?;
            merged = Some(segment.with_rewrite(rewrite.clone()));
            Ok(())
        })?;
        drop(opened);
        let merged =
            merged.ok_or_else(|| CoreError::invalid_operation("compaction produced no segment"))?;
        let elements = merged.len()?;

        let superseded: Vec<_> = spilled.splice(0..take, std::iter::once(merged)).collect();
        debug!(
            set = %id,
            merged = take,
            elements,
            segments = spilled.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compacted segments"
        );
        release_all(superseded)
    }

    fn edit_all<F>(&mut self, mut edit: F) -> CoreResult<bool>
    where
        F: FnMut(&mut OrderedSegment<E>) -> CoreResult<bool>,
    {
        let mut changed = edit(&mut self.buffer)?;
        let mut emptied = Vec::new();
        for (index, segment) in self.spilled.iter_mut().enumerate() {
            if segment.edit_reloading(|segment| edit(segment))? {
                changed = true;
                if segment.is_empty()? {
                    emptied.push(index);
                }
            }
        }
        self.drop_segments(&emptied)?;
        Ok(changed)
    }

    fn drop_segments(&mut self, indices: &[usize]) -> CoreResult<()> {
        let mut dropped = Vec::with_capacity(indices.len());
        for &index in indices.iter().rev() {
            dropped.push(self.spilled.remove(index));
        }
        release_all(dropped)
    }
}

/// Opens a cursor over each compaction input.
fn open_inputs<E: Element>(inputs: &[OrderedSegment<E>]) -> CoreResult<Vec<BoxCursor<'_, E>>> {
    inputs
        .iter()
        .map(|segment| segment.iter().map(SetIter::into_cursor))
        .collect::<CoreResult<Vec<_>>>()
        .map_err(CoreError::compaction_input)
}

/// Releases every segment, returning the first failure after trying all.
fn release_all<E: Element>(segments: Vec<OrderedSegment<E>>) -> CoreResult<()> {
    let mut first_error = None;
    for mut segment in segments {
        if let Err(err) = segment.release() {
            warn!(error = %err, "failed to release segment");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl<E: Element> SortedSet<E> for BufferedSortedSet<E> {
    fn order(&self) -> &ElementOrder<E> {
        &self.order
    }

    fn bounds(&self) -> &KeyRange<E> {
        &self.full
    }

    /// Sum of the buffer and segment sizes. Duplicates spread over several
    /// segments are counted once per segment until compaction merges them.
    fn len(&self) -> CoreResult<usize> {
        let mut total = self.buffer.len()?;
        for segment in &self.spilled {
            total += segment.len()?;
        }
        Ok(total)
    }

    fn is_empty(&self) -> CoreResult<bool> {
        if !self.buffer.is_empty()? {
            return Ok(false);
        }
        for segment in &self.spilled {
            if !segment.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn contains(&self, element: &E) -> CoreResult<bool> {
        if self.buffer.contains(element)? {
            return Ok(true);
        }
        for segment in &self.spilled {
            if segment.contains(element)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert(&mut self, element: E) -> CoreResult<bool> {
        let changed = self.buffer.insert(element)?;
        self.spill_if_full()?;
        Ok(changed)
    }

    fn remove(&mut self, element: &E) -> CoreResult<bool> {
        let mut removed = self.buffer.remove(element)?;
        let mut emptied = Vec::new();
        for (index, segment) in self.spilled.iter_mut().enumerate() {
            if segment.remove_reloading(element)? {
                removed = true;
                if segment.is_empty()? {
                    emptied.push(index);
                }
            }
        }
        self.drop_segments(&emptied)?;
        Ok(removed)
    }

    fn iter(&self) -> CoreResult<SetIter<'_, E>> {
        let mut sources = Vec::with_capacity(self.spilled.len() + 1);
        for segment in &self.spilled {
            sources.push(segment.iter()?.into_cursor());
        }
        sources.push(self.buffer.iter()?.into_cursor());
        Ok(SetIter::new(Box::new(KWayMerge::deduplicating(
            sources,
            self.order.clone(),
            self.rewrite.clone(),
        ))))
    }

    fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>> {
        let Self {
            order,
            rewrite,
            buffer,
            spilled,
            ..
        } = self;
        let mut sources = Vec::with_capacity(spilled.len() + 1);
        for segment in spilled.iter_mut() {
            sources.push(segment.cursor_mut()?.into_cursor());
        }
        sources.push(buffer.cursor_mut()?.into_cursor());
        Ok(SetIter::new(Box::new(KWayMerge::deduplicating(
            sources,
            order.clone(),
            rewrite.clone(),
        ))))
    }

    fn first(&self) -> CoreResult<E> {
        pick_extreme(
            &self.order,
            std::iter::once(&self.buffer)
                .chain(&self.spilled)
                .map(SortedSet::first),
            false,
        )
    }

    fn last(&self) -> CoreResult<E> {
        pick_extreme(
            &self.order,
            std::iter::once(&self.buffer)
                .chain(&self.spilled)
                .map(SortedSet::last),
            true,
        )
    }

    fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>> {
        Ok(Box::new(self.view(range)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{KeepLatest, KeyValue};
    use crate::tiered::MinAvailable;
    use spillset_storage::{DirectoryLocation, MemoryLocation, StorageBackend};
    use std::collections::BTreeSet;

    fn small_config(threshold: usize, max_files: usize) -> SpillConfig {
        SpillConfig::new()
            .buffer_persist_threshold(threshold)
            .max_open_files(max_files)
    }

    fn memory_set(threshold: usize, max_files: usize) -> (BufferedSortedSet<i64>, Arc<MemoryLocation>) {
        let location = Arc::new(MemoryLocation::new("mem"));
        let set = BufferedSortedSet::new(
            small_config(threshold, max_files),
            ElementOrder::natural(),
            location.clone(),
        )
        .unwrap();
        (set, location)
    }

    /// Flips every bit of one byte of a blob in place.
    fn flip_byte(location: &MemoryLocation, namespace: &str, name: &str, offset: usize) {
        let mut backend = location.open(namespace, name).unwrap();
        let size = backend.size().unwrap();
        let mut bytes = backend.read_at(0, size as usize).unwrap();
        bytes[offset] ^= 0xff;
        backend.truncate(0).unwrap();
        backend.append(&bytes).unwrap();
    }

    fn three_segments() -> (BufferedSortedSet<i64>, Arc<MemoryLocation>) {
        let (mut set, location) = memory_set(2, 2);
        set.insert_all([1, 2]).unwrap();
        set.insert_all([3, 4]).unwrap();
        set.insert_all([5, 6]).unwrap();
        assert_eq!(set.segment_count(), 3);
        (set, location)
    }

    #[test]
    fn spills_when_threshold_reached() {
        let (mut set, location) = memory_set(3, 10);
        set.insert(3).unwrap();
        set.insert(1).unwrap();
        assert_eq!(set.segment_count(), 0);
        assert_eq!(set.buffer_len(), 2);

        set.insert(2).unwrap();
        assert_eq!(set.segment_count(), 1);
        assert_eq!(set.buffer_len(), 0);
        assert_eq!(location.blob_count(), 1);
        assert!(set.has_persisted_data());
        assert!(set.is_persisted());

        set.insert(0).unwrap();
        assert!(!set.is_persisted());
        assert_eq!(set.to_vec().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(set.first().unwrap(), 0);
        assert_eq!(set.last().unwrap(), 3);
    }

    #[test]
    fn compaction_bounds_segment_count() {
        let (mut set, location) = memory_set(5, 7);
        let mut reference = BTreeSet::new();
        for batch in 0..8i64 {
            let elements: Vec<i64> = (0..5).map(|i| batch * 10 + i).collect();
            reference.extend(elements.iter().copied());
            set.insert_all(elements).unwrap();
        }
        assert_eq!(set.segment_count(), 8);
        assert_eq!(location.blob_count(), 8);

        set.persist().unwrap();
        assert!(set.segment_count() <= 7);
        assert_eq!(location.blob_count(), set.segment_count());
        assert_eq!(set.to_vec().unwrap(), reference.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn compaction_converges_for_many_segments() {
        let (mut set, location) = memory_set(1, 3);
        for n in 0..20 {
            set.insert(n).unwrap();
        }
        assert_eq!(set.segment_count(), 20);
        set.persist().unwrap();
        assert!(set.segment_count() <= 3);
        assert_eq!(location.blob_count(), set.segment_count());
        assert_eq!(set.to_vec().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn unbounded_files_skip_compaction() {
        let (mut set, _location) = memory_set(1, 0);
        for n in 0..5 {
            set.insert(n).unwrap();
        }
        set.persist().unwrap();
        assert_eq!(set.segment_count(), 5);
    }

    #[test]
    fn duplicates_are_counted_until_compacted() {
        let (mut set, _location) = memory_set(1, 10);
        for _ in 0..3 {
            set.insert(7).unwrap();
        }
        assert_eq!(set.segment_count(), 3);
        assert_eq!(set.len().unwrap(), 3);
        assert_eq!(set.to_vec().unwrap(), vec![7]);

        assert_eq!(set.compact(2).unwrap(), 1);
        assert_eq!(set.segment_count(), 2);
        assert_eq!(set.len().unwrap(), 2);
        assert_eq!(set.to_vec().unwrap(), vec![7]);
    }

    #[test]
    fn remove_reaches_spilled_segments() {
        let (mut set, location) = memory_set(2, 10);
        set.insert_all([1, 2]).unwrap();
        set.insert_all([3, 4]).unwrap();
        set.insert(5).unwrap();

        assert!(set.remove(&3).unwrap());
        assert!(set.remove(&5).unwrap());
        assert!(!set.remove(&42).unwrap());
        assert_eq!(set.to_vec().unwrap(), vec![1, 2, 4]);
        assert_eq!(set.segment_count(), 2);

        assert!(set.remove(&4).unwrap());
        assert_eq!(set.segment_count(), 1);
        assert_eq!(location.blob_count(), 1);
        assert!(set.segments().iter().all(|info| info.persisted));
    }

    #[test]
    fn bulk_removal_and_retain() {
        let (mut set, _location) = memory_set(4, 10);
        set.insert_all(0..10).unwrap();
        assert!(set.remove_all(&[0, 9, 100]).unwrap());
        assert!(set.remove_if(|n| n % 2 == 0).unwrap());
        assert_eq!(set.to_vec().unwrap(), vec![1, 3, 5, 7]);
        assert!(set.retain(|n| *n > 3).unwrap());
        assert_eq!(set.to_vec().unwrap(), vec![5, 7]);
        assert!(!set.retain(|_| true).unwrap());
    }

    #[test]
    fn iterator_removal_needs_unpersisted_owner() {
        let (mut set, _location) = memory_set(2, 10);
        set.insert_all([1, 2]).unwrap();
        set.insert(3).unwrap();

        let mut cursor = set.cursor_mut().unwrap();
        assert_eq!(cursor.next().unwrap().unwrap(), 1);
        assert!(matches!(
            cursor.remove_current(),
            Err(CoreError::Immutable { .. })
        ));
        assert_eq!(cursor.next().unwrap().unwrap(), 2);
        assert_eq!(cursor.next().unwrap().unwrap(), 3);
        cursor.remove_current().unwrap();
        drop(cursor);

        assert_eq!(set.to_vec().unwrap(), vec![1, 2]);
    }

    #[test]
    fn clear_releases_blobs() {
        let (mut set, location) = memory_set(2, 10);
        set.insert_all(0..7).unwrap();
        set.insert(100).unwrap();
        assert!(location.blob_count() > 0);

        set.clear().unwrap();
        assert_eq!(location.blob_count(), 0);
        assert!(set.is_empty().unwrap());
        assert_eq!(set.segment_count(), 0);
        assert!(matches!(set.first(), Err(CoreError::NoSuchElement)));
    }

    #[test]
    fn insert_after_persist_starts_new_buffer() {
        let (mut set, _location) = memory_set(100, 10);
        set.insert_all([1, 2, 3]).unwrap();
        set.persist().unwrap();
        assert_eq!(set.segment_count(), 1);
        assert_eq!(set.buffer_len(), 0);

        assert!(set.insert(4).unwrap());
        assert_eq!(set.buffer_len(), 1);
        assert_eq!(set.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn rewrite_strategy_applies_across_segments() {
        let location = Arc::new(MemoryLocation::new("mem"));
        let mut set = BufferedSortedSet::new(
            small_config(1, 2),
            ElementOrder::<KeyValue<u32, u32>>::by_key(),
            location,
        )
        .unwrap()
        .with_rewrite(|old: &KeyValue<u32, u32>, new: &KeyValue<u32, u32>| new.value > old.value);

        set.insert(KeyValue::new(1, 10)).unwrap();
        set.insert(KeyValue::new(1, 30)).unwrap();
        set.insert(KeyValue::new(1, 20)).unwrap();
        assert_eq!(set.to_vec().unwrap(), vec![KeyValue::new(1, 30)]);

        set.persist().unwrap();
        assert_eq!(set.to_vec().unwrap(), vec![KeyValue::new(1, 30)]);
    }

    #[test]
    fn range_view_tracks_later_inserts() {
        let (mut set, _location) = memory_set(3, 10);
        set.insert_all([1, 5, 9, 13]).unwrap();
        set.insert(7).unwrap();
        {
            let mut view = set.sub_set(4, 10).unwrap();
            assert_eq!(view.to_vec().unwrap(), vec![5, 7, 9]);
            view.insert(6).unwrap();
            assert!(matches!(view.insert(10), Err(CoreError::OutOfRange { .. })));
            assert_eq!(view.to_vec().unwrap(), vec![5, 6, 7, 9]);
            assert!(view.remove(&9).unwrap());
        }
        assert_eq!(set.to_vec().unwrap(), vec![1, 5, 6, 7, 13]);
    }

    #[test]
    fn lowest_priority_location_without_space_stays_empty() {
        let tight = Arc::new(MemoryLocation::new("tight").with_capacity(1024));
        let roomy = Arc::new(MemoryLocation::new("roomy"));
        let mut set = BufferedSortedSet::with_locations(
            small_config(4, 10),
            ElementOrder::natural(),
            vec![
                CandidateLocation::new(tight.clone())
                    .with_priority(0)
                    .with_min_available(MinAvailable::megabytes(1)),
                CandidateLocation::new(roomy.clone()).with_priority(1),
            ],
        )
        .unwrap();

        set.insert_all(0..40i64).unwrap();
        set.insert_all(40..80).unwrap();
        set.persist().unwrap();

        assert_eq!(tight.blob_count(), 0);
        assert_eq!(roomy.blob_count(), set.segment_count());
        assert!(set
            .segments()
            .iter()
            .all(|info| info.location == roomy.describe()));
    }

    #[test]
    fn failed_spill_keeps_buffer() {
        let location = Arc::new(MemoryLocation::new("mem"));
        let mut set = BufferedSortedSet::new(
            small_config(2, 10).retries(0),
            ElementOrder::natural(),
            location.clone(),
        )
        .unwrap();
        location.fail_next_creates(1);

        set.insert(1).unwrap();
        assert!(matches!(
            set.insert(2),
            Err(CoreError::PersistFailed { attempts: 1, .. })
        ));
        assert_eq!(set.buffer_len(), 2);
        assert_eq!(set.to_vec().unwrap(), vec![1, 2]);
        assert_eq!(set.abandoned_locations(), vec![location.describe()]);
    }

    #[test]
    fn recover_by_id() {
        let location = Arc::new(DirectoryLocation::temporary().unwrap());
        let id = {
            let mut set = BufferedSortedSet::new(
                small_config(3, 10),
                ElementOrder::natural(),
                location.clone(),
            )
            .unwrap();
            set.insert_all([10u64, 20, 30]).unwrap();
            set.insert_all([5u64, 15, 25]).unwrap();
            set.insert(1).unwrap();
            set.persist().unwrap();
            set.id()
        };

        let mut recovered: BufferedSortedSet<u64> = BufferedSortedSet::recover(
            id,
            small_config(3, 2),
            ElementOrder::natural(),
            vec![CandidateLocation::new(location.clone())],
        )
        .unwrap();
        assert_eq!(recovered.segment_count(), 3);
        assert_eq!(recovered.to_vec().unwrap(), vec![1, 5, 10, 15, 20, 25, 30]);

        recovered.persist().unwrap();
        assert_eq!(recovered.segment_count(), 2);
        recovered.insert(2).unwrap();
        assert_eq!(recovered.len().unwrap(), 8);
    }

    #[test]
    fn corrupt_compaction_input_leaves_destination_eligible() {
        let (mut set, location) = three_segments();
        let oldest = set.segments()[0].name.clone();
        flip_byte(&location, &set.id().to_string(), &oldest, 0);

        match set.persist() {
            Err(CoreError::CompactionInput { source }) => {
                assert!(matches!(*source, CoreError::SegmentCorruption { .. }));
            }
            other => panic!("expected CompactionInput, got {other:?}"),
        }
        assert!(set.abandoned_locations().is_empty());
        assert_eq!(set.segment_count(), 3);
        assert_eq!(location.blob_count(), 3);

        set.insert_all([7, 8]).unwrap();
        assert_eq!(set.segment_count(), 4);
        assert_eq!(location.blob_count(), 4);
    }

    #[test]
    fn checksum_failure_mid_merge_releases_partial_output() {
        let (mut set, location) = three_segments();
        let second = set.segments()[1].name.clone();
        // First byte of the first record's payload.
        flip_byte(&location, &set.id().to_string(), &second, 16);

        match set.persist() {
            Err(CoreError::CompactionInput { source }) => {
                assert!(matches!(*source, CoreError::ChecksumMismatch { .. }));
            }
            other => panic!("expected CompactionInput, got {other:?}"),
        }
        assert!(set.abandoned_locations().is_empty());
        assert_eq!(location.blob_count(), 3);
        assert!(set
            .segments()
            .iter()
            .all(|info| info.id.generation == 0));
    }

    #[test]
    fn rewrite_survivor_is_stable_across_recovery() {
        let location = Arc::new(MemoryLocation::new("mem"));
        let mut set = BufferedSortedSet::new(
            small_config(1, 2),
            ElementOrder::<KeyValue<u32, u32>>::by_key(),
            location.clone(),
        )
        .unwrap()
        .with_rewrite(KeepLatest);
        for value in [10, 20, 30] {
            set.insert(KeyValue::new(1, value)).unwrap();
        }
        assert_eq!(set.segment_count(), 3);

        set.persist().unwrap();
        assert_eq!(set.segment_count(), 2);
        assert_eq!(set.segments()[0].id, SegmentId::new(1).next_generation());
        assert_eq!(set.to_vec().unwrap(), vec![KeyValue::new(1, 30)]);
        let id = set.id();
        drop(set);

        let recovered = BufferedSortedSet::recover(
            id,
            small_config(1, 2),
            ElementOrder::<KeyValue<u32, u32>>::by_key(),
            vec![CandidateLocation::new(location)],
        )
        .unwrap()
        .with_rewrite(KeepLatest);
        assert_eq!(recovered.segment_count(), 2);
        assert_eq!(recovered.to_vec().unwrap(), vec![KeyValue::new(1, 30)]);
    }

    #[test]
    fn recovery_reconciles_segments_across_locations() {
        let first = Arc::new(MemoryLocation::new("first").with_capacity(1024 * 1024));
        let second = Arc::new(MemoryLocation::new("second"));
        let id = {
            let mut set: BufferedSortedSet<i64> = BufferedSortedSet::with_locations(
                small_config(2, 0).retries(0),
                ElementOrder::natural(),
                vec![
                    CandidateLocation::new(first.clone()),
                    CandidateLocation::new(second.clone()).with_priority(1),
                ],
            )
            .unwrap();
            set.insert_all([1, 2]).unwrap();
            first.fail_next_creates(1);
            set.insert_all([3, 4]).unwrap();
            set.insert_all([5, 6]).unwrap();
            set.insert_all([7, 8]).unwrap();
            set.id()
        };
        assert_eq!(first.blob_count(), 1);
        assert_eq!(second.blob_count(), 3);

        let mut recovered: BufferedSortedSet<i64> = BufferedSortedSet::recover(
            id,
            small_config(2, 3),
            ElementOrder::natural(),
            vec![
                CandidateLocation::new(first.clone()).with_min_available(MinAvailable::megabytes(2)),
                CandidateLocation::new(second.clone()).with_priority(1),
            ],
        )
        .unwrap();
        assert_eq!(recovered.segment_count(), 4);
        assert_eq!(recovered.segments()[0].location, first.describe());
        assert_eq!(recovered.to_vec().unwrap(), (1..=8).collect::<Vec<_>>());

        recovered.persist().unwrap();
        assert_eq!(recovered.segment_count(), 3);
        assert_eq!(first.blob_count(), 0);
        assert_eq!(second.blob_count(), 3);
        let segments = recovered.segments();
        assert!(segments.iter().all(|info| info.location == second.describe()));
        assert_eq!(segments[0].id, SegmentId::new(1).next_generation());
        assert_eq!(recovered.to_vec().unwrap(), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let location = Arc::new(MemoryLocation::new("mem"));
        assert!(matches!(
            BufferedSortedSet::<i64>::new(small_config(0, 10), ElementOrder::natural(), location),
            Err(CoreError::InvalidConfig { .. })
        ));
        assert!(matches!(
            BufferedSortedSet::<i64>::with_locations(
                SpillConfig::default(),
                ElementOrder::natural(),
                Vec::new()
            ),
            Err(CoreError::InvalidConfig { .. })
        ));
    }
}
