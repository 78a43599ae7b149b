//! Range-restricted views over a single segment.

use super::ordered::OrderedSegment;
use crate::cursor::SetIter;
use crate::error::{CoreError, CoreResult};
use crate::order::{Element, ElementOrder};
use crate::range::KeyRange;
use crate::set::{BoxSet, SortedSet};

/// A live view of the part of a segment inside a [`KeyRange`].
///
/// Reads see the segment's current contents. Inserting outside the range
/// fails with [`CoreError::OutOfRange`]; removing an element outside the
/// range is a no-op.
///
/// Views created by a buffered set reload persisted segments around
/// writes, the same way the set itself does.
pub struct SegmentView<'a, E: Element> {
    segment: &'a mut OrderedSegment<E>,
    range: KeyRange<E>,
    reload_on_write: bool,
}

impl<'a, E: Element> SegmentView<'a, E> {
    pub(crate) fn new(
        segment: &'a mut OrderedSegment<E>,
        range: KeyRange<E>,
        reload_on_write: bool,
    ) -> Self {
        Self {
            segment,
            range,
            reload_on_write,
        }
    }
}

impl<E: Element> SortedSet<E> for SegmentView<'_, E> {
    fn order(&self) -> &ElementOrder<E> {
        self.segment.order()
    }

    fn bounds(&self) -> &KeyRange<E> {
        &self.range
    }

    fn len(&self) -> CoreResult<usize> {
        self.segment.len_in(&self.range)
    }

    fn contains(&self, element: &E) -> CoreResult<bool> {
        self.segment.contains_in(&self.range, element)
    }

    fn insert(&mut self, element: E) -> CoreResult<bool> {
        if !self.range.contains(&element, self.segment.order()) {
            return Err(CoreError::out_of_range(format!(
                "{element:?} is outside {:?}",
                self.range
            )));
        }
        if self.reload_on_write {
            self.segment
                .edit_reloading(|segment| segment.insert(element))
        } else {
            self.segment.insert(element)
        }
    }

    fn remove(&mut self, element: &E) -> CoreResult<bool> {
        if !self.range.contains(element, self.segment.order()) {
            return Ok(false);
        }
        if self.reload_on_write {
            self.segment.remove_reloading(element)
        } else {
            self.segment.remove(element)
        }
    }

    fn iter(&self) -> CoreResult<SetIter<'_, E>> {
        Ok(SetIter::new(self.segment.cursor_in(&self.range)?))
    }

    fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>> {
        Ok(SetIter::new(self.segment.cursor_mut_in(&self.range)?))
    }

    fn first(&self) -> CoreResult<E> {
        self.segment.first_in(&self.range)
    }

    fn last(&self) -> CoreResult<E> {
        self.segment.last_in(&self.range)
    }

    fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>> {
        let narrowed = self.range.narrow(range, self.segment.order())?;
        Ok(Box::new(SegmentView::new(
            &mut *self.segment,
            narrowed,
            self.reload_on_write,
        )))
    }
}
