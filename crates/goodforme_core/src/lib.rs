//! Observable persistence gateway for the GoodForMe activity tracker.
//! This crate maps immutable domain values onto a SQLite record store and
//! turns commits into ordered change events for presentation subscribers.

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod observe;
pub mod service;
pub mod store;

pub use config::{GatewayConfig, StoreConfig, StoreLocation};
pub use gateway::Gateway;
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LogRotation};
pub use model::activity::{is_same_utc_day, midnight_utc, UserActivity, DAY_MS};
pub use model::ids::{LogicalId, StorageId};
pub use observe::{
    diff, replay, ChangeDelegate, ChangeEvent, ChangeObserver, Delivery, EntryChange, EntryKey,
    ReplayError, SortOrder,
};
pub use service::activity_service::{ActivityError, ActivityResult, ActivityService};
pub use service::data_service::DataService;
pub use service::presentation::PresentationQueue;
pub use service::subscription::{ChangeCallback, SubscriptionRegistry};
pub use store::{
    CommitListener, CommitReport, FamilySchema, FieldKind, FieldSpec, FieldValue, ListenerId,
    MappingError, MappingErrorKind, Persistable, PersistentStore, Record, SchemaError,
    StoreError, StoreHandle, StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
