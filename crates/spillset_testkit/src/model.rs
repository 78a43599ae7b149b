//! Reference model for differential testing.
//!
//! A [`ReferenceModel`] is a plain `BTreeSet` driven by the same
//! [`SetOperation`]s as a spilling set. Any observable difference between
//! the two is reported as a [`Divergence`].

use crate::generators::SetOperation;
use spillset_core::{BufferedSortedSet, CoreError, SortedSet};
use std::collections::BTreeSet;
use std::fmt;

/// The first point at which a set stopped agreeing with the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Index of the operation in the sequence (`None` for the final check).
    pub step: Option<usize>,
    /// The operation, if any.
    pub operation: Option<SetOperation>,
    /// What the model expected.
    pub expected: String,
    /// What the set produced.
    pub actual: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.step, &self.operation) {
            (Some(step), Some(op)) => write!(
                f,
                "step {step} ({op:?}): expected {}, got {}",
                self.expected, self.actual
            ),
            _ => write!(
                f,
                "final contents: expected {}, got {}",
                self.expected, self.actual
            ),
        }
    }
}

/// In-memory reference for a set of `u32`.
#[derive(Debug, Clone, Default)]
pub struct ReferenceModel {
    elements: BTreeSet<u32>,
}

impl ReferenceModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// The model's elements in order.
    pub fn elements(&self) -> Vec<u32> {
        self.elements.iter().copied().collect()
    }

    /// Applies `op`, returning the observable result as text.
    pub fn apply(&mut self, op: &SetOperation) -> String {
        match op {
            SetOperation::Insert(key) => self.elements.insert(*key).to_string(),
            SetOperation::Remove(key) => self.elements.remove(key).to_string(),
            SetOperation::Contains(key) => self.elements.contains(key).to_string(),
            SetOperation::Persist | SetOperation::Compact(_) => "ok".to_string(),
            SetOperation::First => describe(self.elements.first().copied()),
            SetOperation::Last => describe(self.elements.last().copied()),
        }
    }

    /// Runs `ops` against both the model and `set`, then compares the
    /// full contents.
    ///
    /// Insert results are not compared: an insert into the buffer cannot
    /// see duplicates already spilled to older segments.
    pub fn check(
        &mut self,
        set: &mut BufferedSortedSet<u32>,
        ops: &[SetOperation],
    ) -> Result<(), Divergence> {
        for (step, op) in ops.iter().enumerate() {
            let expected = self.apply(op);
            let actual = apply_to_set(set, op);
            let comparable = !matches!(op, SetOperation::Insert(_));
            if comparable && expected != actual {
                return Err(Divergence {
                    step: Some(step),
                    operation: Some(op.clone()),
                    expected,
                    actual,
                });
            }
            if actual.starts_with("error") {
                return Err(Divergence {
                    step: Some(step),
                    operation: Some(op.clone()),
                    expected,
                    actual,
                });
            }
        }

        let expected = format!("{:?}", self.elements());
        let actual = match set.to_vec() {
            Ok(elements) => format!("{elements:?}"),
            Err(err) => format!("error: {err}"),
        };
        if expected == actual {
            Ok(())
        } else {
            Err(Divergence {
                step: None,
                operation: None,
                expected,
                actual,
            })
        }
    }
}

fn describe(element: Option<u32>) -> String {
    element.map_or_else(|| "none".to_string(), |element| element.to_string())
}

fn apply_to_set(set: &mut BufferedSortedSet<u32>, op: &SetOperation) -> String {
    let result = match op {
        SetOperation::Insert(key) => set.insert(*key).map(|added| added.to_string()),
        SetOperation::Remove(key) => set.remove(key).map(|removed| removed.to_string()),
        SetOperation::Contains(key) => set.contains(key).map(|found| found.to_string()),
        SetOperation::Persist => set.persist().map(|()| "ok".to_string()),
        SetOperation::Compact(max) => set.compact(*max).map(|_| "ok".to_string()),
        SetOperation::First => extreme(set.first()),
        SetOperation::Last => extreme(set.last()),
    };
    result.unwrap_or_else(|err| format!("error: {err}"))
}

fn extreme(result: Result<u32, CoreError>) -> Result<String, CoreError> {
    match result {
        Ok(element) => Ok(element.to_string()),
        Err(CoreError::NoSuchElement) => Ok("none".to_string()),
        Err(err) => Err(err),
    }
}
