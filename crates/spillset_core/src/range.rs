//! Key ranges for bounded views.

use crate::error::{CoreError, CoreResult};
use crate::order::ElementOrder;
use std::cmp::Ordering;
use std::fmt;

/// A half-open range `[start, end)` over elements.
///
/// A missing bound is unbounded on that side.
#[derive(Clone)]
pub struct KeyRange<E> {
    start: Option<E>,
    end: Option<E>,
}

impl<E: fmt::Debug> fmt::Debug for KeyRange<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            Some(start) => write!(f, "[{start:?}, ")?,
            None => write!(f, "(-inf, ")?,
        }
        match &self.end {
            Some(end) => write!(f, "{end:?})"),
            None => write!(f, "+inf)"),
        }
    }
}

impl<E> Default for KeyRange<E> {
    fn default() -> Self {
        Self::full()
    }
}

impl<E> KeyRange<E> {
    /// The unbounded range.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// A range with optional bounds.
    pub fn new(start: Option<E>, end: Option<E>) -> Self {
        Self { start, end }
    }

    /// `[from, to)`.
    pub fn between(from: E, to: E) -> Self {
        Self::new(Some(from), Some(to))
    }

    /// Everything strictly below `to`.
    pub fn below(to: E) -> Self {
        Self::new(None, Some(to))
    }

    /// Everything at or above `from`.
    pub fn starting_at(from: E) -> Self {
        Self::new(Some(from), None)
    }

    /// Inclusive lower bound, if any.
    pub fn start(&self) -> Option<&E> {
        self.start.as_ref()
    }

    /// Exclusive upper bound, if any.
    pub fn end(&self) -> Option<&E> {
        self.end.as_ref()
    }

    /// Returns true if neither side is bounded.
    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Returns true if `element` sorts below the lower bound.
    pub fn is_below(&self, element: &E, order: &ElementOrder<E>) -> bool {
        self.start
            .as_ref()
            .is_some_and(|start| order.less(element, start))
    }

    /// Returns true if `element` sorts at or above the upper bound.
    pub fn is_above(&self, element: &E, order: &ElementOrder<E>) -> bool {
        self.end
            .as_ref()
            .is_some_and(|end| order.compare(element, end) != Ordering::Less)
    }

    /// Returns true if `element` lies inside the range.
    pub fn contains(&self, element: &E, order: &ElementOrder<E>) -> bool {
        !self.is_below(element, order) && !self.is_above(element, order)
    }
}

impl<E: Clone + fmt::Debug> KeyRange<E> {
    /// Checks that the lower bound does not exceed the upper bound.
    pub fn validate(&self, order: &ElementOrder<E>) -> CoreResult<()> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if order.compare(start, end) == Ordering::Greater {
                return Err(CoreError::invalid_range(format!(
                    "lower bound {start:?} is above upper bound {end:?}"
                )));
            }
        }
        Ok(())
    }

    /// Restricts this range further.
    ///
    /// An unbounded side of `requested` keeps the current bound. A bounded
    /// side must lie within the current range; asking for anything wider
    /// is an error rather than being clamped.
    pub fn narrow(&self, requested: KeyRange<E>, order: &ElementOrder<E>) -> CoreResult<Self> {
        requested.validate(order)?;
        let KeyRange { start, end } = requested;

        let start = match start {
            None => self.start.clone(),
            Some(start) => {
                if self.is_below(&start, order) || self.is_above(&start, order) {
                    return Err(CoreError::invalid_range(format!(
                        "lower bound {start:?} outside view {self:?}"
                    )));
                }
                Some(start)
            }
        };

        let end = match end {
            None => self.end.clone(),
            Some(end) => {
                let past_end = self
                    .end
                    .as_ref()
                    .is_some_and(|current| order.compare(&end, current) == Ordering::Greater);
                if self.is_below(&end, order) || past_end {
                    return Err(CoreError::invalid_range(format!(
                        "upper bound {end:?} outside view {self:?}"
                    )));
                }
                Some(end)
            }
        };

        Ok(Self { start, end })
    }
}
