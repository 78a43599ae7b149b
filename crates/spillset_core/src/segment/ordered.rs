//! The ordered segment: one sorted run, in memory or persisted.

use super::file_cursor::FileCursor;
use super::format::{self, RecordReader};
use super::handle::SegmentHandle;
use super::view::SegmentView;
use crate::config::PersistOptions;
use crate::cursor::{BoxCursor, SetCursor, SetIter, SliceCursor};
use crate::error::{CoreError, CoreResult};
use crate::order::{should_rewrite, Element, ElementOrder, SharedRewrite};
use crate::range::KeyRange;
use crate::set::{BoxSet, SortedSet};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::time::Instant;
use tracing::debug;

/// A sorted run of elements that is either held in memory or persisted to
/// a backing store.
///
/// # States
///
/// - **In memory**: elements live in a sorted vector and all operations
///   are available.
/// - **Persisted**: the in-memory copy is dropped and reads stream from the
///   backing blob. Mutations fail with [`CoreError::Immutable`] until
///   [`load`](Self::load) is called.
///
/// [`persist`](Self::persist) and [`load`](Self::load) are no-ops when the
/// segment is already in the target state.
pub struct OrderedSegment<E: Element> {
    elements: Vec<E>,
    order: ElementOrder<E>,
    rewrite: Option<SharedRewrite<E>>,
    options: PersistOptions,
    handle: Option<SegmentHandle>,
    persisted: bool,
    full: KeyRange<E>,
}

impl<E: Element> std::fmt::Debug for OrderedSegment<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedSegment")
            .field("persisted", &self.persisted)
            .field("in_memory", &self.elements.len())
            .field("handle", &self.handle)
            .finish()
    }
}

impl<E: Element> OrderedSegment<E> {
    /// Creates an empty in-memory segment.
    pub fn new(order: ElementOrder<E>) -> Self {
        Self {
            elements: Vec::new(),
            order,
            rewrite: None,
            options: PersistOptions::default(),
            handle: None,
            persisted: false,
            full: KeyRange::full(),
        }
    }

    /// Sets the strategy deciding between duplicates.
    #[must_use]
    pub fn with_rewrite(mut self, rewrite: Option<SharedRewrite<E>>) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Sets the verification performed after each persist.
    #[must_use]
    pub fn with_persist_options(mut self, options: PersistOptions) -> Self {
        self.options = options;
        self
    }

    /// Opens an existing persisted segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentCorruption`] if the blob is not a
    /// complete segment.
    pub fn open(handle: SegmentHandle, order: ElementOrder<E>) -> CoreResult<Self> {
        format::read_count(handle.backend())?;
        Ok(Self {
            handle: Some(handle),
            persisted: true,
            ..Self::new(order)
        })
    }

    /// Writes an already sorted, duplicate-free stream straight to a new
    /// persisted segment without holding it in memory.
    ///
    /// On failure the handle is released.
    pub(crate) fn write_sorted<B, I>(
        elements: I,
        mut handle: SegmentHandle,
        order: ElementOrder<E>,
        options: PersistOptions,
    ) -> CoreResult<Self>
    where
        B: Borrow<E>,
        I: IntoIterator<Item = CoreResult<B>>,
    {
        match format::write_run(handle.backend_mut(), elements, &order, &options) {
            Ok(_) => Ok(Self {
                handle: Some(handle),
                persisted: true,
                options,
                ..Self::new(order)
            }),
            Err(err) => {
                handle.discard();
                Err(err)
            }
        }
    }

    /// Returns true while the segment is persisted.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// The backing store handle, if one is assigned.
    pub fn handle(&self) -> Option<&SegmentHandle> {
        self.handle.as_ref()
    }

    pub(crate) fn set_rewrite(&mut self, rewrite: Option<SharedRewrite<E>>) {
        self.rewrite = rewrite;
    }

    /// Number of elements held in memory (zero while persisted).
    pub fn in_memory_len(&self) -> usize {
        self.elements.len()
    }

    /// Writes the elements to the assigned handle and drops them from memory.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] if no handle is assigned,
    /// or with the storage or verification error of the write. After a
    /// failure the segment stays in memory with its contents intact.
    pub fn persist(&mut self) -> CoreResult<()> {
        if self.persisted {
            return Ok(());
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(CoreError::invalid_operation(
                "segment has no backing store handle",
            ));
        };

        let start = Instant::now();
        let written = format::write_run(
            handle.backend_mut(),
            self.elements.iter().map(Ok),
            &self.order,
            &self.options,
        )?;
        debug!(
            segment = handle.name(),
            location = handle.location(),
            elements = written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "persisted segment"
        );

        self.elements = Vec::new();
        self.persisted = true;
        Ok(())
    }

    /// Assigns `handle` and persists to it.
    ///
    /// On failure the new handle is released and the previous assignment
    /// restored. On success a previously assigned handle is released. If
    /// the segment is already persisted, `handle` is released unused.
    pub fn persist_to(&mut self, handle: SegmentHandle) -> CoreResult<()> {
        if self.persisted {
            return handle.release();
        }
        let previous = self.handle.replace(handle);
        match self.persist() {
            Ok(()) => match previous {
                Some(old) => old.release(),
                None => Ok(()),
            },
            Err(err) => {
                if let Some(failed) = self.handle.take() {
                    failed.discard();
                }
                self.handle = previous;
                Err(err)
            }
        }
    }

    /// Reads a persisted segment back into memory, making it mutable.
    pub fn load(&mut self) -> CoreResult<()> {
        if !self.persisted {
            return Ok(());
        }
        let handle = self.require_handle()?;
        let mut reader = RecordReader::open(handle.backend())?;
        let mut elements = Vec::new();
        while let Some(element) = reader.next_element::<E>()? {
            elements.push(element);
        }
        debug!(
            segment = handle.name(),
            elements = elements.len(),
            "loaded segment"
        );
        self.elements = elements;
        self.persisted = false;
        Ok(())
    }

    /// Drops the in-memory copy of an unmodified, previously persisted
    /// segment without rewriting it.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::VerificationFailed`] if the stored blob does
    /// not hold the same number of elements as memory; call
    /// [`persist`](Self::persist) after modifying a loaded segment.
    pub fn unload(&mut self) -> CoreResult<()> {
        if self.persisted {
            return Ok(());
        }
        let handle = self.require_handle()?;
        let stored = format::read_count(handle.backend())?;
        if stored != self.elements.len() as u64 {
            return Err(CoreError::verification_failed(
                handle.name(),
                format!(
                    "blob holds {stored} elements, memory holds {}",
                    self.elements.len()
                ),
            ));
        }
        self.elements = Vec::new();
        self.persisted = true;
        Ok(())
    }

    /// Deletes the backing blob (if any) and empties the segment.
    pub fn release(&mut self) -> CoreResult<()> {
        self.elements.clear();
        self.persisted = false;
        match self.handle.take() {
            Some(handle) => handle.release(),
            None => Ok(()),
        }
    }

    /// Inserts every element. Returns true if the segment changed.
    pub fn insert_all<I: IntoIterator<Item = E>>(&mut self, elements: I) -> CoreResult<bool> {
        self.ensure_mutable("insert")?;
        let mut changed = false;
        for element in elements {
            changed |= self.insert_unchecked(element);
        }
        Ok(changed)
    }

    /// Removes every listed element. Returns true if any was present.
    pub fn remove_all(&mut self, elements: &[E]) -> CoreResult<bool> {
        self.ensure_mutable("remove")?;
        let mut changed = false;
        for element in elements {
            if let Ok(index) = self.search(element) {
                self.elements.remove(index);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Keeps only elements matching `keep`. Returns true if any was removed.
    pub fn retain<F: FnMut(&E) -> bool>(&mut self, keep: F) -> CoreResult<bool> {
        self.ensure_mutable("retain")?;
        let before = self.elements.len();
        self.elements.retain(keep);
        Ok(self.elements.len() != before)
    }

    /// Removes elements matching `predicate`. Returns true if any was removed.
    pub fn remove_if<F: FnMut(&E) -> bool>(&mut self, mut predicate: F) -> CoreResult<bool> {
        self.retain(|element| !predicate(element))
    }

    /// Runs a mutation, reloading a persisted segment around it.
    ///
    /// A persisted segment is loaded, mutated and then persisted again if
    /// `edit` reported a change, or unloaded unchanged otherwise.
    pub(crate) fn edit_reloading<F>(&mut self, edit: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut Self) -> CoreResult<bool>,
    {
        if !self.persisted {
            return edit(self);
        }
        self.load()?;
        let changed = edit(self)?;
        if changed {
            self.persist()?;
        } else {
            self.unload()?;
        }
        Ok(changed)
    }

    /// Removes `element`, rewriting the segment if it is persisted.
    pub(crate) fn remove_reloading(&mut self, element: &E) -> CoreResult<bool> {
        if self.persisted && !self.contains(element)? {
            return Ok(false);
        }
        self.edit_reloading(|segment| segment.remove(element))
    }

    fn require_handle(&self) -> CoreResult<&SegmentHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("segment has no backing store handle"))
    }

    fn ensure_mutable(&self, operation: &str) -> CoreResult<()> {
        if self.persisted {
            let name = self.handle.as_ref().map_or("<unassigned>", SegmentHandle::name);
            return Err(CoreError::immutable(format!(
                "cannot {operation} on persisted segment {name}; load it first"
            )));
        }
        Ok(())
    }

    fn search(&self, element: &E) -> Result<usize, usize> {
        self.elements
            .binary_search_by(|candidate| self.order.compare(candidate, element))
    }

    fn insert_unchecked(&mut self, element: E) -> bool {
        match self.search(&element) {
            Ok(index) => {
                if should_rewrite(self.rewrite.as_ref(), &self.elements[index], &element) {
                    self.elements[index] = element;
                    true
                } else {
                    false
                }
            }
            Err(index) => {
                self.elements.insert(index, element);
                true
            }
        }
    }

    /// Index span of in-memory elements inside `range`.
    fn span(&self, range: &KeyRange<E>) -> (usize, usize) {
        let start = match range.start() {
            Some(start) => self
                .elements
                .partition_point(|candidate| self.order.less(candidate, start)),
            None => 0,
        };
        let end = match range.end() {
            Some(end) => self
                .elements
                .partition_point(|candidate| self.order.less(candidate, end)),
            None => self.elements.len(),
        };
        (start, end.max(start))
    }

    fn file_cursor(&self, range: &KeyRange<E>) -> CoreResult<FileCursor<'_, E>> {
        let handle = self.require_handle()?;
        Ok(FileCursor::new(
            RecordReader::open(handle.backend())?,
            self.order.clone(),
            range.clone(),
        ))
    }

    pub(crate) fn cursor_in(&self, range: &KeyRange<E>) -> CoreResult<BoxCursor<'_, E>> {
        if self.persisted {
            return Ok(Box::new(self.file_cursor(range)?));
        }
        let (start, end) = self.span(range);
        Ok(Box::new(SliceCursor::shared(&self.elements[start..end])))
    }

    pub(crate) fn cursor_mut_in(&mut self, range: &KeyRange<E>) -> CoreResult<BoxCursor<'_, E>> {
        if self.persisted {
            return Ok(Box::new(self.file_cursor(range)?));
        }
        let (start, end) = self.span(range);
        Ok(Box::new(SliceCursor::exclusive(&mut self.elements, start, end)))
    }

    pub(crate) fn len_in(&self, range: &KeyRange<E>) -> CoreResult<usize> {
        if !self.persisted {
            let (start, end) = self.span(range);
            return Ok(end - start);
        }
        if range.is_full() {
            let handle = self.require_handle()?;
            return Ok(format::read_count(handle.backend())? as usize);
        }
        let mut cursor = self.file_cursor(range)?;
        let mut count = 0;
        while cursor.advance()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub(crate) fn contains_in(&self, range: &KeyRange<E>, element: &E) -> CoreResult<bool> {
        if !range.contains(element, &self.order) {
            return Ok(false);
        }
        if !self.persisted {
            return Ok(self.search(element).is_ok());
        }
        let mut cursor = self.file_cursor(range)?;
        while let Some(candidate) = cursor.advance()? {
            match self.order.compare(&candidate, element) {
                Ordering::Less => {}
                Ordering::Equal => return Ok(true),
                Ordering::Greater => return Ok(false),
            }
        }
        Ok(false)
    }

    pub(crate) fn first_in(&self, range: &KeyRange<E>) -> CoreResult<E> {
        self.cursor_in(range)?
            .advance()?
            .ok_or(CoreError::NoSuchElement)
    }

    pub(crate) fn last_in(&self, range: &KeyRange<E>) -> CoreResult<E> {
        if !self.persisted {
            let (start, end) = self.span(range);
            return self.elements[start..end]
                .last()
                .cloned()
                .ok_or(CoreError::NoSuchElement);
        }
        let mut cursor = self.file_cursor(range)?;
        let mut last = None;
        while let Some(element) = cursor.advance()? {
            last = Some(element);
        }
        last.ok_or(CoreError::NoSuchElement)
    }

    pub(crate) fn view(&mut self, range: KeyRange<E>, reload_on_write: bool) -> SegmentView<'_, E> {
        SegmentView::new(self, range, reload_on_write)
    }
}

impl<E: Element> SortedSet<E> for OrderedSegment<E> {
    fn order(&self) -> &ElementOrder<E> {
        &self.order
    }

    fn bounds(&self) -> &KeyRange<E> {
        &self.full
    }

    fn len(&self) -> CoreResult<usize> {
        self.len_in(&self.full)
    }

    fn contains(&self, element: &E) -> CoreResult<bool> {
        self.contains_in(&self.full, element)
    }

    fn insert(&mut self, element: E) -> CoreResult<bool> {
        self.ensure_mutable("insert")?;
        Ok(self.insert_unchecked(element))
    }

    fn remove(&mut self, element: &E) -> CoreResult<bool> {
        self.ensure_mutable("remove")?;
        match self.search(element) {
            Ok(index) => {
                self.elements.remove(index);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn iter(&self) -> CoreResult<SetIter<'_, E>> {
        Ok(SetIter::new(self.cursor_in(&self.full)?))
    }

    fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>> {
        let full = KeyRange::full();
        Ok(SetIter::new(self.cursor_mut_in(&full)?))
    }

    fn first(&self) -> CoreResult<E> {
        self.first_in(&self.full)
    }

    fn last(&self) -> CoreResult<E> {
        self.last_in(&self.full)
    }

    fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>> {
        range.validate(&self.order)?;
        Ok(Box::new(self.view(range, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::handle::{segment_name, SegmentId};
    use spillset_storage::{DirectoryLocation, MemoryLocation, StoreLocation};

    fn handle(location: &dyn StoreLocation, sequence: u64) -> SegmentHandle {
        let id = SegmentId::new(sequence);
        let backend = location.create("test", &segment_name(id)).unwrap();
        SegmentHandle::new(backend, location.describe(), id)
    }

    fn segment_with(values: &[i64]) -> OrderedSegment<i64> {
        let mut segment = OrderedSegment::new(ElementOrder::natural());
        segment.insert_all(values.iter().copied()).unwrap();
        segment
    }

    #[test]
    fn insert_keeps_order_and_rejects_duplicates() {
        let mut segment = segment_with(&[5, 1, 3]);
        assert!(!segment.insert(3).unwrap());
        assert!(segment.insert(2).unwrap());
        assert_eq!(segment.to_vec().unwrap(), vec![1, 2, 3, 5]);
        assert_eq!(segment.first().unwrap(), 1);
        assert_eq!(segment.last().unwrap(), 5);
    }

    #[test]
    fn empty_segment_has_no_bounds() {
        let segment = segment_with(&[]);
        assert!(matches!(segment.first(), Err(CoreError::NoSuchElement)));
        assert!(matches!(segment.last(), Err(CoreError::NoSuchElement)));
        assert!(segment.is_empty().unwrap());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[9, 3, 7, 1]);
        segment.persist_to(handle(&location, 1)).unwrap();

        assert!(segment.is_persisted());
        assert_eq!(segment.in_memory_len(), 0);
        assert_eq!(segment.len().unwrap(), 4);
        assert!(segment.contains(&7).unwrap());
        assert!(!segment.contains(&8).unwrap());
        assert_eq!(segment.first().unwrap(), 1);
        assert_eq!(segment.last().unwrap(), 9);
        assert_eq!(segment.to_vec().unwrap(), vec![1, 3, 7, 9]);

        segment.load().unwrap();
        assert!(!segment.is_persisted());
        assert_eq!(segment.to_vec().unwrap(), vec![1, 3, 7, 9]);
    }

    #[test]
    fn persist_and_load_are_idempotent() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2]);
        segment.load().unwrap();
        segment.persist_to(handle(&location, 1)).unwrap();
        segment.persist().unwrap();
        assert_eq!(location.blob_count(), 1);
        segment.load().unwrap();
        segment.load().unwrap();
        assert_eq!(segment.len().unwrap(), 2);
    }

    #[test]
    fn persisted_segment_rejects_mutation() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2, 3]);
        segment.persist_to(handle(&location, 1)).unwrap();

        assert!(matches!(segment.insert(4), Err(CoreError::Immutable { .. })));
        assert!(matches!(segment.remove(&1), Err(CoreError::Immutable { .. })));
        assert!(matches!(
            segment.retain(|_| false),
            Err(CoreError::Immutable { .. })
        ));

        let mut cursor = segment.cursor_mut().unwrap();
        assert_eq!(cursor.next().unwrap().unwrap(), 1);
        assert!(matches!(
            cursor.remove_current(),
            Err(CoreError::Immutable { .. })
        ));
        drop(cursor);

        segment.load().unwrap();
        assert!(segment.remove(&1).unwrap());
        assert_eq!(segment.to_vec().unwrap(), vec![2, 3]);
    }

    #[test]
    fn persist_without_handle_fails() {
        let mut segment = segment_with(&[1]);
        assert!(matches!(
            segment.persist(),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(segment.to_vec().unwrap(), vec![1]);
    }

    #[test]
    fn failed_persist_releases_new_handle() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2, 3]);
        let mut doomed = handle(&location, 1);
        doomed.backend_mut().delete().unwrap();

        assert!(segment.persist_to(doomed).is_err());
        assert!(!segment.is_persisted());
        assert!(segment.handle().is_none());
        assert_eq!(segment.to_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unload_requires_unchanged_contents() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2, 3]);
        segment.persist_to(handle(&location, 1)).unwrap();

        segment.load().unwrap();
        segment.unload().unwrap();
        assert!(segment.is_persisted());

        segment.load().unwrap();
        segment.insert(4).unwrap();
        assert!(matches!(
            segment.unload(),
            Err(CoreError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn remove_reloading_rewrites_in_place() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2, 3]);
        segment.persist_to(handle(&location, 1)).unwrap();

        assert!(segment.remove_reloading(&2).unwrap());
        assert!(!segment.remove_reloading(&42).unwrap());
        assert!(segment.is_persisted());
        assert_eq!(segment.to_vec().unwrap(), vec![1, 3]);
        assert_eq!(location.blob_count(), 1);
    }

    #[test]
    fn rewrite_strategy_decides_duplicates() {
        use crate::order::KeyValue;
        use std::sync::Arc;

        let rewrite: SharedRewrite<KeyValue<u32, u32>> =
            Arc::new(|old: &KeyValue<u32, u32>, new: &KeyValue<u32, u32>| new.value > old.value);
        let mut segment = OrderedSegment::new(ElementOrder::<KeyValue<u32, u32>>::by_key())
            .with_rewrite(Some(rewrite));

        segment.insert(KeyValue::new(1, 10)).unwrap();
        assert!(!segment.insert(KeyValue::new(1, 5)).unwrap());
        assert!(segment.insert(KeyValue::new(1, 20)).unwrap());
        assert_eq!(segment.to_vec().unwrap(), vec![KeyValue::new(1, 20)]);
    }

    #[test]
    fn release_deletes_blob() {
        let location = MemoryLocation::new("mem");
        let mut segment = segment_with(&[1, 2, 3]);
        segment.persist_to(handle(&location, 1)).unwrap();
        assert_eq!(location.blob_count(), 1);

        segment.release().unwrap();
        assert_eq!(location.blob_count(), 0);
        assert!(!segment.is_persisted());
        assert!(segment.is_empty().unwrap());
    }

    #[test]
    fn open_existing_blob_from_directory() {
        let location = DirectoryLocation::temporary().unwrap();
        {
            let mut segment = segment_with(&[4, 8, 15, 16, 23, 42]);
            segment.persist_to(handle(&location, 3)).unwrap();
        }
        let id = SegmentId::new(3);
        let backend = location.open("test", &segment_name(id)).unwrap();
        let reopened: OrderedSegment<i64> =
            OrderedSegment::open(SegmentHandle::new(backend, location.describe(), id), ElementOrder::natural())
                .unwrap();
        assert_eq!(reopened.len().unwrap(), 6);
        assert_eq!(reopened.to_vec().unwrap(), vec![4, 8, 15, 16, 23, 42]);
    }

    #[test]
    fn iterator_removal_while_in_memory() {
        let mut segment = segment_with(&[1, 2, 3, 4, 5, 6]);
        {
            let mut cursor = segment.cursor_mut().unwrap();
            while let Some(element) = cursor.next() {
                if element.unwrap() % 2 == 0 {
                    cursor.remove_current().unwrap();
                }
            }
        }
        assert_eq!(segment.to_vec().unwrap(), vec![1, 3, 5]);
    }
}
