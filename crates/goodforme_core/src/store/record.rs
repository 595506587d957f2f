//! Backing record representation owned by `PersistentStore`.
//!
//! # Responsibility
//! - Hold one persisted entity as named field values plus identity headers.
//! - Offer typed field accessors that report schema drift as `MappingError`.
//!
//! # Invariants
//! - `storage_id` is set only by the store; `Persistable` code can read it but
//!   has no way to change it.
//! - A record always belongs to exactly one registered family.

use crate::model::ids::{LogicalId, StorageId};
use crate::store::persistable::{MappingError, MappingErrorKind};
use crate::store::schema::{FamilySchema, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named field value stored in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    IntegerList(Vec<i64>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Bool(_) => FieldKind::Bool,
            Self::Integer(_) => FieldKind::Integer,
            Self::Real(_) => FieldKind::Real,
            Self::Text(_) => FieldKind::Text,
            Self::IntegerList(_) => FieldKind::IntegerList,
        }
    }
}

pub(crate) type FieldMap = BTreeMap<String, FieldValue>;

/// Backing-store representation of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    storage_id: Option<StorageId>,
    logical_id: LogicalId,
    schema: &'static FamilySchema,
    fields: FieldMap,
}

impl Record {
    /// Creates an unpersisted record with every declared field set to its
    /// kind default.
    pub fn blank(schema: &'static FamilySchema, logical_id: LogicalId) -> Self {
        let fields = schema
            .fields
            .iter()
            .map(|spec| (spec.name.to_string(), spec.kind.default_value()))
            .collect();
        Self {
            storage_id: None,
            logical_id,
            schema,
            fields,
        }
    }

    pub(crate) fn from_parts(
        storage_id: StorageId,
        logical_id: LogicalId,
        schema: &'static FamilySchema,
        fields: FieldMap,
    ) -> Self {
        Self {
            storage_id: Some(storage_id),
            logical_id,
            schema,
            fields,
        }
    }

    pub fn storage_id(&self) -> Option<StorageId> {
        self.storage_id
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    pub fn family(&self) -> &'static str {
        self.schema.family
    }

    pub fn schema(&self) -> &'static FamilySchema {
        self.schema
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub(crate) fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Sets one field, replacing any previous value.
    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    /// Builder form of [`Record::set`].
    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn bool(&self, name: &str) -> Result<bool, MappingError> {
        match self.require(name, FieldKind::Bool)? {
            FieldValue::Bool(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::Bool, other)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, MappingError> {
        match self.require(name, FieldKind::Integer)? {
            FieldValue::Integer(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::Integer, other)),
        }
    }

    pub fn real(&self, name: &str) -> Result<f64, MappingError> {
        match self.require(name, FieldKind::Real)? {
            FieldValue::Real(value) => Ok(*value),
            other => Err(self.mismatch(name, FieldKind::Real, other)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, MappingError> {
        match self.require(name, FieldKind::Text)? {
            FieldValue::Text(value) => Ok(value.as_str()),
            other => Err(self.mismatch(name, FieldKind::Text, other)),
        }
    }

    pub fn integer_list(&self, name: &str) -> Result<&[i64], MappingError> {
        match self.require(name, FieldKind::IntegerList)? {
            FieldValue::IntegerList(values) => Ok(values.as_slice()),
            other => Err(self.mismatch(name, FieldKind::IntegerList, other)),
        }
    }

    /// Checks that the field set matches the family declaration exactly.
    pub fn validate(&self) -> Result<(), MappingError> {
        for spec in self.schema.fields {
            let value = self.require(spec.name, spec.kind)?;
            if value.kind() != spec.kind {
                return Err(self.mismatch(spec.name, spec.kind, value));
            }
        }
        if let Some(name) = self
            .fields
            .keys()
            .find(|name| self.schema.field(name).is_none())
        {
            return Err(MappingError::new(
                self.schema.family,
                name.as_str(),
                MappingErrorKind::Undeclared,
            ));
        }
        Ok(())
    }

    fn require(&self, name: &str, expected: FieldKind) -> Result<&FieldValue, MappingError> {
        self.fields.get(name).ok_or_else(|| {
            MappingError::new(
                self.schema.family,
                name,
                MappingErrorKind::Missing { expected },
            )
        })
    }

    fn mismatch(&self, name: &str, expected: FieldKind, found: &FieldValue) -> MappingError {
        MappingError::new(
            self.schema.family,
            name,
            MappingErrorKind::KindMismatch {
                expected,
                found: found.kind(),
            },
        )
    }
}
