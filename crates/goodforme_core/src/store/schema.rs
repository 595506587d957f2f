//! Static family registration for persistable types.
//!
//! # Responsibility
//! - Declare, per domain type, the backing family name and field list.
//! - Validate declarations before the store touches SQL with them.
//!
//! # Invariants
//! - Family and field names match `^[a-z][a-z0-9_]*$`.
//! - Field names are unique inside one family.
//! - One store never accepts two different declarations for the same family.

use crate::store::record::FieldValue;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]{0,62}$").unwrap_or_else(|err| panic!("identifier regex: {err}"))
});

/// Value kind accepted by one declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Integer,
    Real,
    Text,
    IntegerList,
}

impl FieldKind {
    /// Value written into freshly created records.
    pub fn default_value(self) -> FieldValue {
        match self {
            Self::Bool => FieldValue::Bool(false),
            Self::Integer => FieldValue::Integer(0),
            Self::Real => FieldValue::Real(0.0),
            Self::Text => FieldValue::Text(String::new()),
            Self::IntegerList => FieldValue::IntegerList(Vec::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::IntegerList => "integer_list",
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Explicit registration of one domain type's backing shape.
#[derive(Debug, PartialEq, Eq)]
pub struct FamilySchema {
    pub family: &'static str,
    pub fields: &'static [FieldSpec],
}

impl FamilySchema {
    pub const fn new(family: &'static str, fields: &'static [FieldSpec]) -> Self {
        Self { family, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Checks naming rules and field uniqueness.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !IDENTIFIER_RE.is_match(self.family) {
            return Err(SchemaError::InvalidFamilyName(self.family.to_string()));
        }
        for (index, spec) in self.fields.iter().enumerate() {
            if !IDENTIFIER_RE.is_match(spec.name) {
                return Err(SchemaError::InvalidFieldName {
                    family: self.family,
                    field: spec.name.to_string(),
                });
            }
            if self.fields[..index].iter().any(|seen| seen.name == spec.name) {
                return Err(SchemaError::DuplicateField {
                    family: self.family,
                    field: spec.name,
                });
            }
        }
        Ok(())
    }
}

/// Errors raised by family registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidFamilyName(String),
    InvalidFieldName { family: &'static str, field: String },
    DuplicateField { family: &'static str, field: &'static str },
    ConflictingDeclaration(&'static str),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFamilyName(name) => write!(f, "invalid family name `{name}`"),
            Self::InvalidFieldName { family, field } => {
                write!(f, "invalid field name `{field}` in family `{family}`")
            }
            Self::DuplicateField { family, field } => {
                write!(f, "field `{field}` declared twice in family `{family}`")
            }
            Self::ConflictingDeclaration(family) => {
                write!(f, "family `{family}` already registered with a different field list")
            }
        }
    }
}

impl Error for SchemaError {}

/// Per-store table of accepted family declarations.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    families: BTreeMap<&'static str, &'static FamilySchema>,
}

impl SchemaRegistry {
    /// Registers `schema` on first use; later calls only check consistency.
    pub(crate) fn ensure(&mut self, schema: &'static FamilySchema) -> Result<(), SchemaError> {
        if let Some(existing) = self.families.get(schema.family) {
            if *existing == schema {
                return Ok(());
            }
            return Err(SchemaError::ConflictingDeclaration(schema.family));
        }
        schema.validate()?;
        self.families.insert(schema.family, schema);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn families(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.families.keys().copied()
    }
}
