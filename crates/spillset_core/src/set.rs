//! The sorted-set contract shared by segments, views and buffered sets.

use crate::cursor::SetIter;
use crate::error::{CoreError, CoreResult};
use crate::order::{Element, ElementOrder};
use crate::range::KeyRange;

/// A boxed range view borrowing its parent for `'a`.
pub type BoxSet<'a, E> = Box<dyn SortedSet<E> + 'a>;

/// Operations common to every sorted container in this crate.
///
/// All operations can touch a backing store, so every one of them returns
/// a [`CoreResult`]. Duplicates are judged by [`SortedSet::order`].
pub trait SortedSet<E: Element> {
    /// The order this set keeps its elements in.
    fn order(&self) -> &ElementOrder<E>;

    /// The range this set is restricted to (full for unrestricted sets).
    fn bounds(&self) -> &KeyRange<E>;

    /// Number of elements visible through this set.
    fn len(&self) -> CoreResult<usize>;

    /// Returns true if no element is visible.
    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns true if an equivalent element is present.
    fn contains(&self, element: &E) -> CoreResult<bool>;

    /// Inserts an element. Returns true if the set changed.
    fn insert(&mut self, element: E) -> CoreResult<bool>;

    /// Removes the equivalent element. Returns true if one was removed.
    fn remove(&mut self, element: &E) -> CoreResult<bool>;

    /// Iterates elements in ascending order.
    fn iter(&self) -> CoreResult<SetIter<'_, E>>;

    /// Iterates elements in ascending order with removal support.
    fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>>;

    /// The smallest element.
    ///
    /// Fails with [`CoreError::NoSuchElement`] when empty.
    fn first(&self) -> CoreResult<E>;

    /// The largest element.
    ///
    /// Fails with [`CoreError::NoSuchElement`] when empty.
    fn last(&self) -> CoreResult<E>;

    /// A live view restricted to `range`.
    fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>>;

    /// View of `[from, to)`.
    fn sub_set(&mut self, from: E, to: E) -> CoreResult<BoxSet<'_, E>> {
        self.range_view(KeyRange::between(from, to))
    }

    /// View of everything below `to`.
    fn head_set(&mut self, to: E) -> CoreResult<BoxSet<'_, E>> {
        self.range_view(KeyRange::below(to))
    }

    /// View of everything at or above `from`.
    fn tail_set(&mut self, from: E) -> CoreResult<BoxSet<'_, E>> {
        self.range_view(KeyRange::starting_at(from))
    }

    /// Collects all elements in order.
    fn to_vec(&self) -> CoreResult<Vec<E>> {
        self.iter()?.collect()
    }
}

/// Picks the extreme element among several candidates, skipping empty ones.
pub(crate) fn pick_extreme<E: Element>(
    order: &ElementOrder<E>,
    candidates: impl IntoIterator<Item = CoreResult<E>>,
    want_largest: bool,
) -> CoreResult<E> {
    let mut best: Option<E> = None;
    for candidate in candidates {
        let element = match candidate {
            Ok(element) => element,
            Err(CoreError::NoSuchElement) => continue,
            Err(err) => return Err(err),
        };
        best = match best {
            None => Some(element),
            Some(current) => {
                let replace = if want_largest {
                    order.less(&current, &element)
                } else {
                    order.less(&element, &current)
                };
                Some(if replace { element } else { current })
            }
        };
    }
    best.ok_or(CoreError::NoSuchElement)
}

macro_rules! forward_sorted_set {
    () => {
        fn order(&self) -> &ElementOrder<E> {
            (**self).order()
        }

        fn bounds(&self) -> &KeyRange<E> {
            (**self).bounds()
        }

        fn len(&self) -> CoreResult<usize> {
            (**self).len()
        }

        fn is_empty(&self) -> CoreResult<bool> {
            (**self).is_empty()
        }

        fn contains(&self, element: &E) -> CoreResult<bool> {
            (**self).contains(element)
        }

        fn insert(&mut self, element: E) -> CoreResult<bool> {
            (**self).insert(element)
        }

        fn remove(&mut self, element: &E) -> CoreResult<bool> {
            (**self).remove(element)
        }

        fn iter(&self) -> CoreResult<SetIter<'_, E>> {
            (**self).iter()
        }

        fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>> {
            (**self).cursor_mut()
        }

        fn first(&self) -> CoreResult<E> {
            (**self).first()
        }

        fn last(&self) -> CoreResult<E> {
            (**self).last()
        }

        fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>> {
            (**self).range_view(range)
        }
    };
}

impl<E: Element, S: SortedSet<E> + ?Sized> SortedSet<E> for &mut S {
    forward_sorted_set!();
}

impl<E: Element, S: SortedSet<E> + ?Sized> SortedSet<E> for Box<S> {
    forward_sorted_set!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_extreme_skips_empty_members() {
        let order = ElementOrder::<i32>::natural();
        let candidates = vec![Err(CoreError::NoSuchElement), Ok(4), Ok(2), Ok(9)];
        assert_eq!(pick_extreme(&order, candidates.into_iter(), false).unwrap(), 2);

        let candidates = vec![Ok(4), Err(CoreError::NoSuchElement), Ok(9)];
        assert_eq!(pick_extreme(&order, candidates, true).unwrap(), 9);
    }

    #[test]
    fn pick_extreme_of_nothing_is_no_such_element() {
        let order = ElementOrder::<i32>::natural();
        let result = pick_extreme(&order, Vec::new(), false);
        assert!(matches!(result, Err(CoreError::NoSuchElement)));
    }

    #[test]
    fn pick_extreme_propagates_errors() {
        let order = ElementOrder::<i32>::natural();
        let candidates = vec![Ok(1), Err(CoreError::immutable("boom"))];
        assert!(matches!(
            pick_extreme(&order, candidates, false),
            Err(CoreError::Immutable { .. })
        ));
    }
}
