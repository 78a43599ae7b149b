//! Element ordering and duplicate resolution.
//!
//! A set never relies on `Ord` directly. Every container carries an
//! [`ElementOrder`], which may be the natural order of the element type or
//! any caller-supplied comparator. Two elements are duplicates when the
//! order compares them as `Equal`, even if they differ otherwise; which of
//! the two is kept is decided by an optional [`RewriteStrategy`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Bounds required of anything stored in a spillable set.
///
/// Elements must be serializable so that segments can be written to and
/// read back from a backing store.
pub trait Element: Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{}

type CompareFn<E> = dyn Fn(&E, &E) -> Ordering + Send + Sync;

/// A total order over elements.
pub struct ElementOrder<E> {
    compare: Arc<CompareFn<E>>,
    label: &'static str,
}

impl<E> Clone for ElementOrder<E> {
    fn clone(&self) -> Self {
        Self {
            compare: Arc::clone(&self.compare),
            label: self.label,
        }
    }
}

impl<E> fmt::Debug for ElementOrder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementOrder")
            .field("label", &self.label)
            .finish()
    }
}

impl<E: 'static> ElementOrder<E> {
    /// The natural order of the element type.
    #[must_use]
    pub fn natural() -> Self
    where
        E: Ord,
    {
        Self {
            compare: Arc::new(|a: &E, b: &E| a.cmp(b)),
            label: "natural",
        }
    }

    /// An order defined by a comparator.
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
            label: "custom",
        }
    }

    /// The reverse of this order.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let inner = Arc::clone(&self.compare);
        Self {
            compare: Arc::new(move |a: &E, b: &E| inner(b, a)),
            label: "reversed",
        }
    }
}

impl<E> ElementOrder<E> {
    /// Compares two elements.
    #[inline]
    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        (self.compare)(a, b)
    }

    /// Returns true if the order treats the elements as duplicates.
    #[inline]
    pub fn equivalent(&self, a: &E, b: &E) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// Returns true if `a` sorts strictly before `b`.
    #[inline]
    pub fn less(&self, a: &E, b: &E) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// A short name for diagnostics.
    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// A key/value pair ordered by its key alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue<K, V> {
    /// The ordering key.
    pub key: K,
    /// The payload.
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    /// Creates a new pair.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K: Ord + 'static, V: 'static> ElementOrder<KeyValue<K, V>> {
    /// Orders pairs by key. Pairs with equal keys are duplicates.
    #[must_use]
    pub fn by_key() -> Self {
        Self {
            compare: Arc::new(|a: &KeyValue<K, V>, b: &KeyValue<K, V>| a.key.cmp(&b.key)),
            label: "by_key",
        }
    }
}

/// Decides which of two duplicate elements survives.
///
/// `original` is the element already present (or, during a merge, the one
/// from the older source); `update` is the competing element. Returning
/// `true` replaces the original with the update.
pub trait RewriteStrategy<E>: Send + Sync {
    /// Returns true if `update` should replace `original`.
    fn rewrite(&self, original: &E, update: &E) -> bool;
}

impl<E, F> RewriteStrategy<E> for F
where
    F: Fn(&E, &E) -> bool + Send + Sync,
{
    fn rewrite(&self, original: &E, update: &E) -> bool {
        self(original, update)
    }
}

/// A rewrite strategy shared between a set, its segments and its merges.
pub type SharedRewrite<E> = Arc<dyn RewriteStrategy<E>>;

/// Always replaces the original with the update.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLatest;

impl<E> RewriteStrategy<E> for KeepLatest {
    fn rewrite(&self, _original: &E, _update: &E) -> bool {
        true
    }
}

/// Applies an optional strategy. Without one the original is kept.
pub(crate) fn should_rewrite<E>(rewrite: Option<&SharedRewrite<E>>, original: &E, update: &E) -> bool {
    rewrite.is_some_and(|strategy| strategy.rewrite(original, update))
}
