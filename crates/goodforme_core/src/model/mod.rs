//! Domain model for the activity tracker.
//!
//! # Responsibility
//! - Define identity types shared by all persisted values.
//! - Define immutable domain values and their record mapping.
//!
//! # Invariants
//! - Every domain value carries a stable `LogicalId`.
//! - A `StorageId` is present only once the value was committed.

pub mod activity;
pub mod ids;
