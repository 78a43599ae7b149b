//! Cursor over a persisted segment.

use super::format::RecordReader;
use crate::cursor::{Position, SetCursor};
use crate::error::{CoreError, CoreResult};
use crate::order::{Element, ElementOrder};
use crate::range::KeyRange;

/// Streams a persisted segment, restricted to a range.
///
/// Elements below the range are skipped; reading stops at the first
/// element at or above the upper bound.
pub(crate) struct FileCursor<'a, E> {
    reader: RecordReader<'a>,
    order: ElementOrder<E>,
    range: KeyRange<E>,
    lookahead: Option<E>,
    finished: bool,
    position: Position,
}

impl<'a, E: Element> FileCursor<'a, E> {
    pub(crate) fn new(reader: RecordReader<'a>, order: ElementOrder<E>, range: KeyRange<E>) -> Self {
        Self {
            reader,
            order,
            range,
            lookahead: None,
            finished: false,
            position: Position::Fresh,
        }
    }

    fn fill(&mut self) -> CoreResult<()> {
        while self.lookahead.is_none() && !self.finished {
            match self.reader.next_element::<E>()? {
                None => self.finished = true,
                Some(element) if self.range.is_below(&element, &self.order) => {}
                Some(element) if self.range.is_above(&element, &self.order) => {
                    self.finished = true;
                }
                Some(element) => self.lookahead = Some(element),
            }
        }
        Ok(())
    }
}

impl<E: Element> SetCursor<E> for FileCursor<'_, E> {
    fn peek(&mut self) -> CoreResult<Option<&E>> {
        self.fill()?;
        Ok(self.lookahead.as_ref())
    }

    fn advance(&mut self) -> CoreResult<Option<E>> {
        self.fill()?;
        let element = self.lookahead.take();
        self.position = if element.is_some() {
            Position::Returned
        } else {
            Position::Exhausted
        };
        Ok(element)
    }

    fn remove_current(&mut self) -> CoreResult<()> {
        self.position.check_removable()?;
        Err(CoreError::immutable(
            "segment is persisted; load it before removing",
        ))
    }

    fn is_removable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistOptions;
    use crate::segment::format::write_run;
    use spillset_storage::InMemoryBackend;

    fn persisted(numbers: &[u32]) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        write_run(
            &mut backend,
            numbers.iter().map(Ok),
            &ElementOrder::<u32>::natural(),
            &PersistOptions::default(),
        )
        .unwrap();
        backend
    }

    fn cursor(backend: &InMemoryBackend, range: KeyRange<u32>) -> FileCursor<'_, u32> {
        FileCursor::new(
            RecordReader::open(backend).unwrap(),
            ElementOrder::natural(),
            range,
        )
    }

    #[test]
    fn streams_only_the_requested_range() {
        let backend = persisted(&[1, 3, 5, 7, 9]);
        let mut cursor = cursor(&backend, KeyRange::between(3, 9));
        assert_eq!(cursor.peek().unwrap(), Some(&3));
        assert_eq!(cursor.advance().unwrap(), Some(3));
        assert_eq!(cursor.advance().unwrap(), Some(5));
        assert_eq!(cursor.advance().unwrap(), Some(7));
        assert_eq!(cursor.advance().unwrap(), None);
    }

    #[test]
    fn removal_follows_iterator_protocol() {
        let backend = persisted(&[1, 2]);
        let mut cursor = cursor(&backend, KeyRange::full());
        assert!(matches!(
            cursor.remove_current(),
            Err(CoreError::IteratorState { .. })
        ));

        cursor.advance().unwrap();
        assert!(matches!(
            cursor.remove_current(),
            Err(CoreError::Immutable { .. })
        ));
        assert!(!cursor.is_removable());

        cursor.advance().unwrap();
        assert_eq!(cursor.advance().unwrap(), None);
        assert!(matches!(
            cursor.remove_current(),
            Err(CoreError::IteratorState { .. })
        ));
    }
}
