//! Persistable capability: the bridge between domain values and records.
//!
//! # Responsibility
//! - Define the per-type contract used by every generic store operation.
//! - Define `MappingError` and the policy applied when mapping breaks.
//!
//! # Invariants
//! - `from_record` populates every domain field, including both identities.
//! - `apply_to` writes every mutable domain field and cannot touch the
//!   record's storage identity.
//! - Mapping failures are never papered over with default field values.

use crate::model::ids::{LogicalId, StorageId};
use crate::store::record::Record;
use crate::store::schema::{FamilySchema, FieldKind};
use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Capability implemented by every domain type stored through the gateway.
pub trait Persistable: Clone + PartialEq + Send + 'static {
    /// Static registration: backing family name and field list.
    fn schema() -> &'static FamilySchema;

    fn logical_id(&self) -> &LogicalId;

    /// Present exactly once the value has been committed.
    fn storage_id(&self) -> Option<StorageId>;

    fn from_record(record: &Record) -> Result<Self, MappingError>;

    fn apply_to(&self, record: Record) -> Record;
}

/// What went wrong while mapping one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingErrorKind {
    Missing { expected: FieldKind },
    KindMismatch { expected: FieldKind, found: FieldKind },
    Undeclared,
    Invalid(String),
}

/// Record and domain shape disagree (schema drift or a broken mapping).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingError {
    pub family: &'static str,
    pub field: String,
    pub kind: MappingErrorKind,
}

impl MappingError {
    pub fn new(family: &'static str, field: impl Into<String>, kind: MappingErrorKind) -> Self {
        Self {
            family,
            field: field.into(),
            kind,
        }
    }
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let family = self.family;
        let field = self.field.as_str();
        match &self.kind {
            MappingErrorKind::Missing { expected } => {
                write!(f, "{family}.{field}: missing {expected} field")
            }
            MappingErrorKind::KindMismatch { expected, found } => {
                write!(f, "{family}.{field}: expected {expected}, found {found}")
            }
            MappingErrorKind::Undeclared => write!(f, "{family}.{field}: field is not declared"),
            MappingErrorKind::Invalid(message) => write!(f, "{family}.{field}: {message}"),
        }
    }
}

impl Error for MappingError {}

/// Surfaces a mapping failure.
///
/// Development builds abort on the spot; release builds log and hand the
/// error back so the caller fails explicitly.
pub(crate) fn mapping_violation(err: MappingError) -> MappingError {
    error!(
        "event=mapping_violation module=store status=error family={} field={} error={}",
        err.family, err.field, err
    );
    if cfg!(debug_assertions) {
        panic!("persistable mapping violated: {err}");
    }
    err
}
