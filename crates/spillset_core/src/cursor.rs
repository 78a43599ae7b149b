//! Cursors over sorted sources.
//!
//! A [`SetCursor`] yields elements in ascending order and can remove the
//! element it yielded last. Cursors are what the k-way merge consumes, and
//! [`SetIter`] adapts any cursor to a standard [`Iterator`].

use crate::error::{CoreError, CoreResult};

/// A forward cursor over an ordered source.
pub trait SetCursor<E> {
    /// Returns the next element without consuming it.
    fn peek(&mut self) -> CoreResult<Option<&E>>;

    /// Consumes and returns the next element.
    fn advance(&mut self) -> CoreResult<Option<E>>;

    /// Removes the element most recently returned by [`advance`](Self::advance)
    /// from the underlying source.
    ///
    /// Fails with [`CoreError::IteratorState`] before the first advance, when
    /// called twice for the same element, or after the cursor is exhausted.
    fn remove_current(&mut self) -> CoreResult<()>;

    /// Returns true if [`remove_current`](Self::remove_current) would be
    /// permitted right now.
    fn is_removable(&self) -> bool;
}

/// A boxed cursor borrowing its source for `'a`.
pub type BoxCursor<'a, E> = Box<dyn SetCursor<E> + 'a>;

/// Where a cursor stands relative to the last returned element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Fresh,
    Returned,
    Removed,
    Exhausted,
}

impl Position {
    pub(crate) fn check_removable(self) -> CoreResult<()> {
        match self {
            Self::Returned => Ok(()),
            Self::Fresh => Err(CoreError::iterator_state("remove called before next")),
            Self::Removed => Err(CoreError::iterator_state(
                "remove called twice for the same element",
            )),
            Self::Exhausted => Err(CoreError::iterator_state("remove called after exhaustion")),
        }
    }
}

enum Elements<'a, E> {
    Shared(&'a [E]),
    Exclusive(&'a mut Vec<E>),
}

impl<E> Elements<'_, E> {
    fn get(&self, index: usize) -> Option<&E> {
        match self {
            Self::Shared(slice) => slice.get(index),
            Self::Exclusive(vec) => vec.get(index),
        }
    }
}

/// Cursor over a sorted in-memory run.
pub(crate) struct SliceCursor<'a, E> {
    elements: Elements<'a, E>,
    next: usize,
    end: usize,
    position: Position,
}

impl<'a, E> SliceCursor<'a, E> {
    /// Read-only cursor over a whole slice.
    pub(crate) fn shared(elements: &'a [E]) -> Self {
        Self {
            end: elements.len(),
            elements: Elements::Shared(elements),
            next: 0,
            position: Position::Fresh,
        }
    }

    /// Removing cursor over `elements[start..end]`.
    pub(crate) fn exclusive(elements: &'a mut Vec<E>, start: usize, end: usize) -> Self {
        Self {
            elements: Elements::Exclusive(elements),
            next: start,
            end,
            position: Position::Fresh,
        }
    }
}

impl<E: Clone> SetCursor<E> for SliceCursor<'_, E> {
    fn peek(&mut self) -> CoreResult<Option<&E>> {
        if self.next >= self.end {
            return Ok(None);
        }
        Ok(self.elements.get(self.next))
    }

    fn advance(&mut self) -> CoreResult<Option<E>> {
        if self.next >= self.end {
            self.position = Position::Exhausted;
            return Ok(None);
        }
        let element = self.elements.get(self.next).cloned();
        self.next += 1;
        self.position = Position::Returned;
        Ok(element)
    }

    fn remove_current(&mut self) -> CoreResult<()> {
        self.position.check_removable()?;
        match &mut self.elements {
            Elements::Shared(_) => Err(CoreError::immutable(
                "read-only iteration; use cursor_mut to remove",
            )),
            Elements::Exclusive(vec) => {
                self.next -= 1;
                self.end -= 1;
                vec.remove(self.next);
                self.position = Position::Removed;
                Ok(())
            }
        }
    }

    fn is_removable(&self) -> bool {
        matches!(self.elements, Elements::Exclusive(_)) && self.position == Position::Returned
    }
}

/// Returns a read-only cursor over an already sorted slice.
///
/// The slice must be sorted under the order of the merge it feeds.
pub fn slice_cursor<E: Clone>(elements: &[E]) -> BoxCursor<'_, E> {
    Box::new(SliceCursor::shared(elements))
}

/// Iterator adapter over a cursor.
///
/// Yields `CoreResult<E>`; after the first error the iterator is fused.
pub struct SetIter<'a, E> {
    cursor: BoxCursor<'a, E>,
    failed: bool,
}

impl<'a, E> SetIter<'a, E> {
    /// Wraps a cursor.
    pub fn new(cursor: BoxCursor<'a, E>) -> Self {
        Self {
            cursor,
            failed: false,
        }
    }

    /// Removes the element returned by the last call to `next`.
    pub fn remove_current(&mut self) -> CoreResult<()> {
        self.cursor.remove_current()
    }

    /// Returns the next element without consuming it.
    pub fn peek(&mut self) -> CoreResult<Option<&E>> {
        self.cursor.peek()
    }

    /// Unwraps the underlying cursor.
    pub fn into_cursor(self) -> BoxCursor<'a, E> {
        self.cursor
    }
}

impl<E> Iterator for SetIter<'_, E> {
    type Item = CoreResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
