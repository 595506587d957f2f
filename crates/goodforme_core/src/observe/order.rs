//! Caller-supplied ordering for observed collections.

use crate::store::Persistable;
use std::cmp::Ordering;
use std::sync::Arc;

type Comparator<T> = dyn Fn(&T, &T) -> Ordering + Send + Sync;

/// Comparator over domain fields; ties break by `LogicalId` ascending.
pub struct SortOrder<T> {
    compare: Arc<Comparator<T>>,
}

impl<T> Clone for SortOrder<T> {
    fn clone(&self) -> Self {
        Self {
            compare: Arc::clone(&self.compare),
        }
    }
}

impl<T: Persistable> SortOrder<T> {
    pub fn new(compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            compare: Arc::new(compare),
        }
    }

    /// Ascending by one derived key.
    pub fn by_key<K: Ord>(key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::new(move |a, b| key(a).cmp(&key(b)))
    }

    /// Every value ties; the order is LogicalId ascending.
    pub fn by_logical_id() -> Self {
        Self::new(|_, _| Ordering::Equal)
    }

    /// Creation order (StorageId ascending, uncommitted values last).
    pub fn by_creation() -> Self {
        Self::new(|a, b| match (a.storage_id(), b.storage_id()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    }

    /// Same ordering, reversed (the LogicalId tie-break stays ascending).
    pub fn reversed(self) -> Self {
        let compare = self.compare;
        Self::new(move |a, b| compare(b, a))
    }

    /// Compares sort keys only, without the tie-break.
    pub fn same_sort_key(&self, a: &T, b: &T) -> bool {
        (self.compare)(a, b) == Ordering::Equal
    }

    /// Total order used for observed lists.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.compare)(a, b).then_with(|| a.logical_id().cmp(b.logical_id()))
    }

    pub fn sort(&self, values: &mut [T]) {
        values.sort_by(|a, b| self.compare(a, b));
    }
}
