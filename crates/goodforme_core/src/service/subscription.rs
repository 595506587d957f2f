//! Subscriber registry for change fan-out.
//!
//! # Invariants
//! - At most one callback per subscriber key; subscribing again replaces it.
//! - Fan-out works on a snapshot taken at delivery time.

use crate::observe::ChangeEvent;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owned subscriber callback, invoked on the presentation queue with the
/// event and the ordered values it was computed against.
pub type ChangeCallback<T> = Arc<dyn Fn(&ChangeEvent, &[T]) + Send + Sync>;

pub struct SubscriptionRegistry<T> {
    callbacks: BTreeMap<String, ChangeCallback<T>>,
}

impl<T> Default for SubscriptionRegistry<T> {
    fn default() -> Self {
        Self {
            callbacks: BTreeMap::new(),
        }
    }
}

impl<T> SubscriptionRegistry<T> {
    /// Returns `true` when an existing callback was replaced.
    pub fn subscribe(&mut self, key: impl Into<String>, callback: ChangeCallback<T>) -> bool {
        self.callbacks.insert(key.into(), callback).is_some()
    }

    pub fn unsubscribe(&mut self, key: &str) -> bool {
        self.callbacks.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.callbacks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    pub fn snapshot(&self) -> Vec<ChangeCallback<T>> {
        self.callbacks.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeCallback, SubscriptionRegistry};
    use crate::observe::ChangeEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> ChangeCallback<u32> {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &ChangeEvent, values: &[u32]| {
            counter.fetch_add(values.len(), Ordering::SeqCst);
        })
    }

    #[test]
    fn subscribing_twice_replaces_the_callback() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::default();

        assert!(!registry.subscribe("list", counting(&first)));
        assert!(registry.subscribe("list", counting(&second)));
        assert_eq!(registry.len(), 1);

        for callback in registry.snapshot() {
            callback(&ChangeEvent::FullReload, &[7, 8]);
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshot_outlives_later_unsubscribe() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::default();
        registry.subscribe("list", counting(&counter));

        let taken = registry.snapshot();
        assert!(registry.unsubscribe("list"));
        assert!(!registry.contains("list"));
        taken[0](&ChangeEvent::Insert { index: 0 }, &[1]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_key_is_a_no_op() {
        let mut registry = SubscriptionRegistry::<u32>::default();
        assert!(!registry.unsubscribe("missing"));
        assert!(registry.is_empty());
    }
}
