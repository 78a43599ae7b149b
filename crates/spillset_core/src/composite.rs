//! A sorted set composed of other sorted sets.

use crate::cursor::SetIter;
use crate::error::{CoreError, CoreResult};
use crate::merge::KWayMerge;
use crate::order::{Element, ElementOrder, SharedRewrite};
use crate::range::KeyRange;
use crate::set::{pick_extreme, BoxSet, SortedSet};

/// Presents several sorted sets as one.
///
/// The composite owns no elements. Reads merge all members, collapsing
/// elements that appear in more than one member; inserts go to a single
/// designated member; removals are applied to every member.
///
/// A composite taken as a range view carries its range and rejects
/// inserts outside it before any member is touched.
pub struct CompositeView<'a, E: Element> {
    members: Vec<BoxSet<'a, E>>,
    order: ElementOrder<E>,
    rewrite: Option<SharedRewrite<E>>,
    range: KeyRange<E>,
    insert_target: usize,
}

impl<'a, E: Element> CompositeView<'a, E> {
    /// Creates an empty, unrestricted composite.
    pub fn new(order: ElementOrder<E>) -> Self {
        Self {
            members: Vec::new(),
            order,
            rewrite: None,
            range: KeyRange::full(),
            insert_target: 0,
        }
    }

    /// Sets the strategy choosing between duplicates across members.
    #[must_use]
    pub fn with_rewrite(mut self, rewrite: Option<SharedRewrite<E>>) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Restricts the composite to `range`.
    pub fn with_range(mut self, range: KeyRange<E>) -> CoreResult<Self> {
        range.validate(&self.order)?;
        self.range = range;
        Ok(self)
    }

    /// Adds a member. Members added earlier count as older when duplicates
    /// are resolved. Returns the member's index.
    pub fn push(&mut self, member: BoxSet<'a, E>) -> usize {
        self.members.push(member);
        self.members.len() - 1
    }

    /// Designates which member receives inserts.
    pub fn set_insert_target(&mut self, index: usize) -> CoreResult<()> {
        if index >= self.members.len() {
            return Err(CoreError::invalid_operation(format!(
                "insert target {index} out of {} members",
                self.members.len()
            )));
        }
        self.insert_target = index;
        Ok(())
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Mutable access to one member.
    pub fn member_mut(&mut self, index: usize) -> Option<&mut BoxSet<'a, E>> {
        self.members.get_mut(index)
    }
}

impl<E: Element> SortedSet<E> for CompositeView<'_, E> {
    fn order(&self) -> &ElementOrder<E> {
        &self.order
    }

    fn bounds(&self) -> &KeyRange<E> {
        &self.range
    }

    /// Sum of member sizes. Elements present in several members are
    /// counted once per member.
    fn len(&self) -> CoreResult<usize> {
        let mut total = 0;
        for member in &self.members {
            total += member.len()?;
        }
        Ok(total)
    }

    fn is_empty(&self) -> CoreResult<bool> {
        for member in &self.members {
            if !member.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn contains(&self, element: &E) -> CoreResult<bool> {
        if !self.range.contains(element, &self.order) {
            return Ok(false);
        }
        for member in &self.members {
            if member.contains(element)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert(&mut self, element: E) -> CoreResult<bool> {
        if !self.range.contains(&element, &self.order) {
            return Err(CoreError::out_of_range(format!(
                "{element:?} is outside {:?}",
                self.range
            )));
        }
        let target = self.insert_target;
        match self.members.get_mut(target) {
            Some(member) => member.insert(element),
            None => Err(CoreError::invalid_operation("composite has no members")),
        }
    }

    fn remove(&mut self, element: &E) -> CoreResult<bool> {
        if !self.range.contains(element, &self.order) {
            return Ok(false);
        }
        let mut removed = false;
        for member in &mut self.members {
            removed |= member.remove(element)?;
        }
        Ok(removed)
    }

    fn iter(&self) -> CoreResult<SetIter<'_, E>> {
        let sources = self
            .members
            .iter()
            .map(|member| member.iter().map(SetIter::into_cursor))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(SetIter::new(Box::new(KWayMerge::deduplicating(
            sources,
            self.order.clone(),
            self.rewrite.clone(),
        ))))
    }

    fn cursor_mut(&mut self) -> CoreResult<SetIter<'_, E>> {
        let sources = self
            .members
            .iter_mut()
            .map(|member| member.cursor_mut().map(SetIter::into_cursor))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(SetIter::new(Box::new(KWayMerge::deduplicating(
            sources,
            self.order.clone(),
            self.rewrite.clone(),
        ))))
    }

    fn first(&self) -> CoreResult<E> {
        pick_extreme(
            &self.order,
            self.members.iter().map(|member| member.first()),
            false,
        )
    }

    fn last(&self) -> CoreResult<E> {
        pick_extreme(
            &self.order,
            self.members.iter().map(|member| member.last()),
            true,
        )
    }

    fn range_view(&mut self, range: KeyRange<E>) -> CoreResult<BoxSet<'_, E>> {
        let narrowed = self.range.narrow(range, &self.order)?;
        let mut view = CompositeView::new(self.order.clone()).with_rewrite(self.rewrite.clone());
        view.range = narrowed.clone();
        for member in &mut self.members {
            view.push(member.range_view(narrowed.clone())?);
        }
        view.insert_target = self.insert_target;
        Ok(Box::new(view))
    }
}
