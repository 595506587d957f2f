//! Session-level wiring of store, presentation queue and services.
//!
//! # Responsibility
//! - Open the store once per session and inject it into services.
//! - Provide the resign/shutdown hooks that flush pending changes.
//!
//! # Invariants
//! - Exactly one `StoreHandle` and one `PresentationQueue` per gateway.
//! - Shutdown drops every observer, ending all subscriptions.

use crate::config::GatewayConfig;
use crate::model::activity::UserActivity;
use crate::observe::SortOrder;
use crate::service::activity_service::ActivityService;
use crate::service::data_service::DataService;
use crate::service::presentation::PresentationQueue;
use crate::store::{CommitReport, Persistable, StoreHandle, StoreResult};
use log::{error, info};
use std::sync::Arc;

pub struct Gateway {
    store: StoreHandle,
    presentation: Arc<PresentationQueue>,
}

impl Gateway {
    /// Opens the backing store and starts the presentation queue.
    ///
    /// A `StoreError::Open` here is fatal for the session.
    pub fn open(config: GatewayConfig) -> StoreResult<Self> {
        let store = match StoreHandle::open(config.store.clone()) {
            Ok(store) => store,
            Err(err) => {
                error!(
                    "event=gateway_open module=gateway status=error error_code={} error={}",
                    err.code(),
                    err
                );
                return Err(err);
            }
        };
        let presentation = Arc::new(PresentationQueue::start(config.presentation_thread.as_str())?);
        info!(
            "event=gateway_open module=gateway status=ok mode={} presentation_thread={}",
            config.store.mode(),
            presentation.name()
        );
        Ok(Self {
            store,
            presentation,
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn presentation(&self) -> &Arc<PresentationQueue> {
        &self.presentation
    }

    pub fn data_service<T: Persistable>(&self, order: SortOrder<T>) -> DataService<T> {
        DataService::new(self.store.clone(), Arc::clone(&self.presentation), order)
    }

    /// Activity service ordered by creation.
    pub fn activity_service(&self) -> ActivityService {
        ActivityService::new(self.data_service(SortOrder::<UserActivity>::by_creation()))
    }

    /// Commits anything still pending; no-op when the write context is clean.
    pub fn resign_active(&self) -> StoreResult<CommitReport> {
        self.store.with(|store| store.commit())
    }

    /// Reconnects the backing store; every observer delivers `FullReload`.
    pub fn reopen(&self) -> StoreResult<()> {
        self.store.with(|store| store.reopen())
    }

    /// Flushes pending changes, ends every subscription and drains callbacks.
    pub fn shutdown(self) -> StoreResult<()> {
        let flushed = self.resign_active();
        let dropped = self.store.with(|store| store.clear_listeners());
        self.presentation.shutdown();
        match &flushed {
            Ok(_) => info!("event=gateway_shutdown module=gateway status=ok observers={dropped}"),
            Err(err) => error!(
                "event=gateway_shutdown module=gateway status=error observers={} error_code={} error={}",
                dropped,
                err.code(),
                err
            ),
        }
        flushed.map(|_| ())
    }
}
