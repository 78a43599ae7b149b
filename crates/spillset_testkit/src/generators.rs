//! Property-based test generators using proptest.
//!
//! Provides strategies for generating elements and operation sequences
//! over a small key space, so that duplicates and removals of present
//! elements are common.

use proptest::prelude::*;

/// Upper bound (exclusive) of generated keys.
pub const KEY_SPACE: u32 = 256;

/// Strategy for generating keys in `0..KEY_SPACE`.
pub fn key_strategy() -> impl Strategy<Value = u32> {
    0..KEY_SPACE
}

/// Strategy for generating a batch of keys, duplicates included.
pub fn key_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(key_strategy(), 0..max_len)
}

/// Strategy for generating a valid half-open range `[from, to)`.
pub fn range_strategy() -> impl Strategy<Value = (u32, u32)> {
    (key_strategy(), key_strategy()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}

/// An operation applied to a set under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOperation {
    /// Insert a key.
    Insert(u32),
    /// Remove a key.
    Remove(u32),
    /// Check membership.
    Contains(u32),
    /// Spill the buffer and compact.
    Persist,
    /// Compact down to the given segment count.
    Compact(usize),
    /// Read the smallest element.
    First,
    /// Read the largest element.
    Last,
}

/// Strategy for generating set operations.
pub fn set_operation_strategy() -> impl Strategy<Value = SetOperation> {
    prop_oneof![
        8 => key_strategy().prop_map(SetOperation::Insert),
        3 => key_strategy().prop_map(SetOperation::Remove),
        2 => key_strategy().prop_map(SetOperation::Contains),
        1 => Just(SetOperation::Persist),
        1 => (2usize..5).prop_map(SetOperation::Compact),
        1 => Just(SetOperation::First),
        1 => Just(SetOperation::Last),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<SetOperation>> {
    prop::collection::vec(set_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_stay_in_key_space(batch in key_batch_strategy(64)) {
            prop_assert!(batch.iter().all(|&key| key < KEY_SPACE));
        }

        #[test]
        fn ranges_are_ordered((from, to) in range_strategy()) {
            prop_assert!(from <= to);
        }

        #[test]
        fn compact_targets_are_mergeable(ops in operation_sequence_strategy(1, 50)) {
            for op in ops {
                if let SetOperation::Compact(max) = op {
                    prop_assert!(max >= 2);
                }
            }
        }
    }
}
