//! K-way merge over sorted cursors.
//!
//! The merge keeps one lookahead element per source. Each step picks the
//! smallest lookahead by a linear scan (source counts are bounded by the
//! open-file limit), breaking ties in favour of the earliest source.
//!
//! A source is only advanced when the merge needs its next element, so
//! the element a source most recently yielded is always the one the merge
//! most recently returned from it. That is what makes
//! [`SetCursor::remove_current`] on the merge well defined.

use crate::cursor::{BoxCursor, SetCursor};
use crate::error::{CoreError, CoreResult};
use crate::order::{should_rewrite, Element, ElementOrder, SharedRewrite};

enum Head<E> {
    /// The source must be advanced before its next element is known.
    Pending,
    Ready(E),
    Exhausted,
}

impl<E> Head<E> {
    fn element(&self) -> Option<&E> {
        match self {
            Self::Ready(element) => Some(element),
            Self::Pending | Self::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Returned,
    Removed,
    Exhausted,
}

/// Lazily merges sorted sources into one ascending sequence.
///
/// In the default mode every source element is yielded, duplicates
/// included. A [`deduplicating`](Self::deduplicating) merge instead yields
/// one element per group of equivalent lookaheads, chosen by the rewrite
/// strategy, and removal through it deletes the element from every source
/// that contributed to the group.
pub struct KWayMerge<'a, E> {
    sources: Vec<BoxCursor<'a, E>>,
    heads: Vec<Head<E>>,
    order: ElementOrder<E>,
    deduplicate: bool,
    rewrite: Option<SharedRewrite<E>>,
    contributors: Vec<usize>,
    state: State,
}

impl<'a, E: Element> KWayMerge<'a, E> {
    /// Merges sources without deduplication.
    pub fn new(sources: Vec<BoxCursor<'a, E>>, order: ElementOrder<E>) -> Self {
        let heads = sources.iter().map(|_| Head::Pending).collect();
        Self {
            sources,
            heads,
            order,
            deduplicate: false,
            rewrite: None,
            contributors: Vec::new(),
            state: State::Fresh,
        }
    }

    /// Merges sources, collapsing equivalent elements into one.
    ///
    /// Sources are ranked oldest first: between duplicates, the element of
    /// the earlier source is the original and later ones are updates.
    pub fn deduplicating(
        sources: Vec<BoxCursor<'a, E>>,
        order: ElementOrder<E>,
        rewrite: Option<SharedRewrite<E>>,
    ) -> Self {
        Self {
            deduplicate: true,
            rewrite,
            ..Self::new(sources, order)
        }
    }

    /// Number of sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn refill(&mut self) -> CoreResult<()> {
        for (head, source) in self.heads.iter_mut().zip(self.sources.iter_mut()) {
            if matches!(head, Head::Pending) {
                *head = match source.advance()? {
                    Some(element) => Head::Ready(element),
                    None => Head::Exhausted,
                };
            }
        }
        Ok(())
    }

    /// Index of the earliest source holding the smallest lookahead.
    fn min_index(&self) -> Option<usize> {
        let mut best: Option<(usize, &E)> = None;
        for (index, head) in self.heads.iter().enumerate() {
            if let Some(element) = head.element() {
                match best {
                    Some((_, current)) if !self.order.less(element, current) => {}
                    _ => best = Some((index, element)),
                }
            }
        }
        best.map(|(index, _)| index)
    }

    /// Sources sharing the minimum and the index whose element survives.
    fn select(&self) -> Option<(Vec<usize>, usize)> {
        let min = self.min_index()?;
        if !self.deduplicate {
            return Some((vec![min], min));
        }

        let smallest = self.heads[min].element()?;
        let group: Vec<usize> = self
            .heads
            .iter()
            .enumerate()
            .skip(min)
            .filter(|(_, head)| {
                head.element()
                    .is_some_and(|element| self.order.equivalent(element, smallest))
            })
            .map(|(index, _)| index)
            .collect();

        let mut survivor = min;
        for &index in &group[1..] {
            if let (Some(original), Some(update)) =
                (self.heads[survivor].element(), self.heads[index].element())
            {
                if should_rewrite(self.rewrite.as_ref(), original, update) {
                    survivor = index;
                }
            }
        }
        Some((group, survivor))
    }
}

impl<E: Element> SetCursor<E> for KWayMerge<'_, E> {
    fn peek(&mut self) -> CoreResult<Option<&E>> {
        self.refill()?;
        Ok(match self.select() {
            Some((_, survivor)) => self.heads[survivor].element(),
            None => None,
        })
    }

    fn advance(&mut self) -> CoreResult<Option<E>> {
        self.refill()?;
        let Some((group, survivor)) = self.select() else {
            self.state = State::Exhausted;
            self.contributors.clear();
            return Ok(None);
        };

        let mut result = None;
        for &index in &group {
            let head = std::mem::replace(&mut self.heads[index], Head::Pending);
            if index == survivor {
                if let Head::Ready(element) = head {
                    result = Some(element);
                }
            }
        }
        self.contributors = group;
        self.state = State::Returned;
        Ok(result)
    }

    fn remove_current(&mut self) -> CoreResult<()> {
        match self.state {
            State::Returned => {}
            State::Fresh => return Err(CoreError::iterator_state("remove called before next")),
            State::Removed => {
                return Err(CoreError::iterator_state(
                    "remove called twice for the same element",
                ))
            }
            State::Exhausted => {
                return Err(CoreError::iterator_state("remove called after exhaustion"))
            }
        }

        if let Some(&index) = self
            .contributors
            .iter()
            .find(|&&index| !self.sources[index].is_removable())
        {
            return Err(CoreError::immutable(format!(
                "source {index} of the merge does not support removal"
            )));
        }
        for &index in &self.contributors {
            self.sources[index].remove_current()?;
        }
        self.state = State::Removed;
        Ok(())
    }

    fn is_removable(&self) -> bool {
        self.state == State::Returned
            && self
                .contributors
                .iter()
                .all(|&index| self.sources[index].is_removable())
    }
}

impl<E: Element> Iterator for KWayMerge<'_, E> {
    type Item = CoreResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Exhausted {
            return None;
        }
        match self.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => None,
            Err(err) => {
                self.state = State::Exhausted;
                Some(Err(err))
            }
        }
    }
}
