//! Change observer: commit notifications to ordered `ChangeEvent` deliveries.
//!
//! # Responsibility
//! - Keep the last delivered ordering of one family under a `SortOrder`.
//! - On every relevant commit, refetch, diff, and hand the result to exactly
//!   one delegate, synchronously.
//!
//! # Invariants
//! - The observed list only changes together with a delivery.
//! - Entries are keyed by StorageId, falling back to LogicalId.
//! - Anything that cannot be diffed becomes a single `FullReload`.

use crate::model::ids::{LogicalId, StorageId};
use crate::observe::diff::{diff, EntryChange};
use crate::observe::event::ChangeEvent;
use crate::observe::order::SortOrder;
use crate::store::{CommitListener, CommitReport, PersistentStore, Persistable};
use log::{debug, error};

/// Events of one delivery plus the ordering they lead to.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub events: Vec<ChangeEvent>,
    pub snapshot: Vec<T>,
}

impl<T> Delivery<T> {
    pub fn is_full_reload(&self) -> bool {
        self.events.iter().any(|event| *event == ChangeEvent::FullReload)
    }
}

/// Single receiver of an observer's deliveries.
pub trait ChangeDelegate<T>: Send {
    fn deliver(&mut self, delivery: Delivery<T>);
}

impl<T, F> ChangeDelegate<T> for F
where
    F: FnMut(Delivery<T>) + Send,
{
    fn deliver(&mut self, delivery: Delivery<T>) {
        self(delivery)
    }
}

/// Key used to match entries across two observations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Storage(StorageId),
    Logical(LogicalId),
}

impl EntryKey {
    pub fn of<T: Persistable>(value: &T) -> Self {
        match value.storage_id() {
            Some(storage_id) => Self::Storage(storage_id),
            None => Self::Logical(value.logical_id().clone()),
        }
    }
}

/// Watches one family of `T` under a sort order.
pub struct ChangeObserver<T: Persistable> {
    order: SortOrder<T>,
    observed: Vec<T>,
    delegate: Box<dyn ChangeDelegate<T>>,
}

impl<T: Persistable> ChangeObserver<T> {
    pub fn new(order: SortOrder<T>, delegate: impl ChangeDelegate<T> + 'static) -> Self {
        Self {
            order,
            observed: Vec::new(),
            delegate: Box::new(delegate),
        }
    }

    pub fn observed(&self) -> &[T] {
        &self.observed
    }

    /// Diffs `next` (any order) against the last observation and delivers.
    ///
    /// Returns the delivered events; nothing is delivered when empty.
    pub fn observe(&mut self, mut next: Vec<T>) -> Vec<ChangeEvent> {
        self.order.sort(&mut next);
        let order = &self.order;
        let events = diff(&self.observed, &next, EntryKey::of, |old, new| {
            if !order.same_sort_key(old, new) {
                EntryChange::Reordered
            } else if old != new {
                EntryChange::Updated
            } else {
                EntryChange::Unchanged
            }
        });
        if events.is_empty() {
            return events;
        }

        debug!(
            "event=observer_deliver module=observe status=ok family={} events={} size={}",
            T::schema().family,
            events.len(),
            next.len()
        );
        self.observed = next.clone();
        self.delegate.deliver(Delivery {
            events: events.clone(),
            snapshot: next,
        });
        events
    }

    /// Replaces the observation wholesale and delivers one `FullReload`.
    pub fn reload(&mut self, mut next: Vec<T>) {
        self.order.sort(&mut next);
        debug!(
            "event=observer_reload module=observe status=ok family={} size={}",
            T::schema().family,
            next.len()
        );
        self.observed = next.clone();
        self.delegate.deliver(Delivery {
            events: vec![ChangeEvent::FullReload],
            snapshot: next,
        });
    }
}

impl<T: Persistable> CommitListener for ChangeObserver<T> {
    fn family(&self) -> &'static str {
        T::schema().family
    }

    fn committed(&mut self, store: &PersistentStore, _report: &CommitReport) {
        match store.try_fetch_all::<T>() {
            Ok(values) => {
                self.observe(values);
            }
            Err(err) => {
                error!(
                    "event=observer_fetch module=observe status=error family={} error_code={} error={}",
                    T::schema().family,
                    err.code(),
                    err
                );
                self.reload(Vec::new());
            }
        }
    }

    fn reset(&mut self, store: &PersistentStore) {
        self.reload(store.fetch_all::<T>());
    }
}
