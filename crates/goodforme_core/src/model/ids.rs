//! Identity types shared by every persisted domain value.
//!
//! # Invariants
//! - `LogicalId` is generated by the client, never by storage, and never
//!   changes for the lifetime of a value.
//! - `StorageId` is assigned by the backing store on first commit and is
//!   unique within one entity family.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Client-generated identifier, independent of persistence state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for LogicalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LogicalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for LogicalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned surrogate key (SQLite rowid of the backing record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(i64);

impl StorageId {
    pub(crate) fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl Display for StorageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
