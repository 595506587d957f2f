//! Generic persistence gateway over the SQLite record table.
//!
//! # Responsibility
//! - Map `Persistable` domain values to records and back.
//! - Own the single write context (pending creates/updates/deletes) and
//!   flush it atomically on `commit`.
//! - Notify registered commit listeners after every successful commit.
//!
//! # Invariants
//! - All mutation goes through one `PersistentStore`, serialized by
//!   `StoreHandle` when shared.
//! - Read paths that are designated soft log and return empty; every other
//!   failure is returned to the caller.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod handle;
pub mod persistable;
mod persistent_store;
pub mod record;
pub mod schema;

pub use handle::StoreHandle;
pub use persistable::{MappingError, MappingErrorKind, Persistable};
pub use persistent_store::{CommitListener, CommitReport, ListenerId, PersistentStore};
pub use record::{FieldValue, Record};
pub use schema::{FamilySchema, FieldKind, FieldSpec, SchemaError};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure taxonomy of the persistence gateway.
#[derive(Debug)]
pub enum StoreError {
    /// Backing engine unusable; fatal at startup.
    Open(DbError),
    /// A read failed.
    Read(DbError),
    /// A commit failed; the pending change set is kept for retry or discard.
    Commit(DbError),
    /// Record and domain shape disagree.
    Mapping(MappingError),
    Schema(SchemaError),
    RecordNotFound { family: &'static str, id: String },
    Encoding(serde_json::Error),
    Io(std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open(_) => "store_open_failed",
            Self::Read(_) => "store_read_failed",
            Self::Commit(_) => "store_commit_failed",
            Self::Mapping(_) => "mapping_failed",
            Self::Schema(_) => "schema_invalid",
            Self::RecordNotFound { .. } => "record_not_found",
            Self::Encoding(_) => "encoding_failed",
            Self::Io(_) => "io_failed",
        }
    }

    /// A commit that lost a lock race; the write context is still pending.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Commit(err) if err.is_busy())
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(err) => write!(f, "failed to open store: {err}"),
            Self::Read(err) => write!(f, "failed to read store: {err}"),
            Self::Commit(err) => write!(f, "failed to commit store changes: {err}"),
            Self::Mapping(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::RecordNotFound { family, id } => write!(f, "{family} record not found: {id}"),
            Self::Encoding(err) => write!(f, "failed to encode record fields: {err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open(err) | Self::Read(err) | Self::Commit(err) => Some(err),
            Self::Mapping(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::RecordNotFound { .. } => None,
            Self::Encoding(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<MappingError> for StoreError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
