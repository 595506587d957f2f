//! Cached, observable data service for one entity family.
//!
//! # Responsibility
//! - Expose fetch/create/update/delete/subscribe/unsubscribe to callers.
//! - Keep an ordered cache that changes only through observer deliveries.
//! - Fan out every delivered event to all subscribers on the presentation
//!   queue.
//!
//! # Invariants
//! - `update`/`delete` never touch the cache directly.
//! - Cache and observer always hold the same ordering after a delivery.
//! - Lock order is store, then service state; callbacks run with no lock held.
//! - A panicking callback is logged and skipped; other subscribers still run.
//! - Every callback of one delivery sees the same snapshot, taken when the
//!   cache adopted it.

use crate::model::ids::LogicalId;
use crate::observe::{replay, ChangeEvent, ChangeObserver, Delivery, EntryKey, SortOrder};
use crate::service::presentation::PresentationQueue;
use crate::service::subscription::{ChangeCallback, SubscriptionRegistry};
use crate::store::persistable::mapping_violation;
use crate::store::{CommitReport, ListenerId, Persistable, StoreError, StoreHandle, StoreResult};
use log::{debug, error, info};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

struct ServiceState<T> {
    cache: Vec<T>,
    registry: SubscriptionRegistry<T>,
}

/// Gateway entry point used by the presentation layer.
pub struct DataService<T: Persistable> {
    store: StoreHandle,
    presentation: Arc<PresentationQueue>,
    state: Arc<Mutex<ServiceState<T>>>,
    listener_id: ListenerId,
}

impl<T: Persistable> DataService<T> {
    /// Registers an observer for `T` on the store. The cache starts empty;
    /// call [`DataService::fetch`] to load it.
    pub fn new(store: StoreHandle, presentation: Arc<PresentationQueue>, order: SortOrder<T>) -> Self {
        let state = Arc::new(Mutex::new(ServiceState {
            cache: Vec::new(),
            registry: SubscriptionRegistry::default(),
        }));

        let sync_state = Arc::clone(&state);
        let queue = Arc::clone(&presentation);
        let observer = ChangeObserver::new(order, move |delivery: Delivery<T>| {
            apply_delivery(&sync_state, &queue, delivery);
        });
        let listener_id = store.with(|store| store.add_listener(Box::new(observer)));

        Self {
            store,
            presentation,
            state,
            listener_id,
        }
    }

    /// Full reload from the store; subscribers receive `FullReload`.
    ///
    /// A read failure is logged and leaves the cache empty.
    pub fn fetch(&self) {
        self.store
            .with(|store| store.reload_listener(self.listener_id));
        info!(
            "event=service_fetch module=service status=ok family={} size={}",
            T::schema().family,
            self.len()
        );
    }

    /// Fresh unpersisted value: new LogicalId, no StorageId, default fields.
    pub fn create(&self) -> StoreResult<T> {
        let record = self.store.with(|store| store.create::<T>());
        T::from_record(&record).map_err(|err| StoreError::Mapping(mapping_violation(err)))
    }

    /// Saves and commits `value`, returning the committed value with its
    /// StorageId populated. The cache follows through the observer.
    pub fn update(&self, value: &T) -> StoreResult<T> {
        self.store.with(|store| {
            store.save(value)?;
            store.commit()?;
            store
                .fetch_by_logical_id::<T>(value.logical_id())?
                .ok_or_else(|| StoreError::RecordNotFound {
                    family: T::schema().family,
                    id: value.logical_id().to_string(),
                })
        })
    }

    /// Deletes the cached value with `logical_id`.
    ///
    /// Returns `Ok(false)` without touching the store when nothing matches.
    pub fn delete(&self, logical_id: &LogicalId) -> StoreResult<bool> {
        let Some(value) = self.get(logical_id) else {
            debug!(
                "event=service_delete module=service status=skipped family={} logical_id={} reason=not_cached",
                T::schema().family,
                logical_id
            );
            return Ok(false);
        };

        self.store.with(|store| {
            store.delete(&value)?;
            store.commit()?;
            Ok(true)
        })
    }

    /// Retries the pending change set left by a failed commit.
    pub fn retry_commit(&self) -> StoreResult<CommitReport> {
        self.store.with(|store| store.commit())
    }

    /// Drops the pending change set left by a failed commit.
    pub fn discard_pending(&self) {
        self.store.with(|store| store.discard_pending());
    }

    /// Registers `callback` under `key`, replacing any previous one.
    ///
    /// Callbacks run later on the presentation queue. By then
    /// [`DataService::values`] may already reflect newer commits; use
    /// [`DataService::subscribe_with_snapshot`] to read the values an event
    /// was computed against.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) {
        self.subscribe_with_snapshot(key, move |event: &ChangeEvent, _values: &[T]| {
            callback(event)
        });
    }

    /// Like [`DataService::subscribe`], also passing the ordered values the
    /// cache held once the event's delivery was applied.
    pub fn subscribe_with_snapshot(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&ChangeEvent, &[T]) + Send + Sync + 'static,
    ) {
        let key = key.into();
        let callback: ChangeCallback<T> = Arc::new(callback);
        let replaced = self.state().registry.subscribe(key.as_str(), callback);
        debug!(
            "event=service_subscribe module=service status=ok family={} subscriber={} replaced={}",
            T::schema().family,
            key,
            replaced
        );
    }

    pub fn unsubscribe(&self, key: &str) -> bool {
        self.state().registry.unsubscribe(key)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().registry.len()
    }

    /// Cached values in observed order.
    pub fn values(&self) -> Vec<T> {
        self.state().cache.clone()
    }

    pub fn get(&self, logical_id: &LogicalId) -> Option<T> {
        self.state()
            .cache
            .iter()
            .find(|value| value.logical_id() == logical_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().cache.is_empty()
    }

    /// Waits until every callback queued so far has run.
    pub fn flush_presentation(&self) {
        self.presentation.flush();
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    fn state(&self) -> MutexGuard<'_, ServiceState<T>> {
        lock_state(&self.state)
    }
}

impl<T: Persistable> Drop for DataService<T> {
    fn drop(&mut self) {
        self.store
            .with(|store| store.remove_listener(self.listener_id));
    }
}

/// Delegate body: sync the cache, then queue fan-out of the same events.
fn apply_delivery<T: Persistable>(
    state: &Mutex<ServiceState<T>>,
    queue: &PresentationQueue,
    delivery: Delivery<T>,
) {
    let Delivery { events, snapshot } = delivery;
    let (subscribers, values) = {
        let mut state = lock_state(state);
        let subscribers = state.registry.snapshot();
        let values = if subscribers.is_empty() {
            Vec::new()
        } else {
            snapshot.clone()
        };
        sync_cache(&mut state.cache, &events, snapshot);
        (subscribers, values)
    };
    if subscribers.is_empty() {
        return;
    }

    queue.dispatch(move || {
        for event in &events {
            for callback in &subscribers {
                if catch_unwind(AssertUnwindSafe(|| callback(event, values.as_slice()))).is_err() {
                    error!(
                        "event=subscriber_callback module=service status=error family={} change={}",
                        T::schema().family,
                        event
                    );
                }
            }
        }
    });
}

fn sync_cache<T: Persistable>(cache: &mut Vec<T>, events: &[ChangeEvent], snapshot: Vec<T>) {
    let consistent = match replay(cache, events, &snapshot) {
        Ok(()) => cache
            .iter()
            .map(EntryKey::of)
            .eq(snapshot.iter().map(EntryKey::of)),
        Err(err) => {
            error!(
                "event=cache_sync module=service status=error family={} error={}",
                T::schema().family,
                err
            );
            false
        }
    };
    if !consistent {
        error!(
            "event=cache_sync module=service status=diverged family={} events={}",
            T::schema().family,
            events.len()
        );
    }
    // moved entries keep stale content after replay
    *cache = snapshot;
}

fn lock_state<T>(state: &Mutex<ServiceState<T>>) -> MutexGuard<'_, ServiceState<T>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
