//! User activity domain model.
//!
//! # Responsibility
//! - Describe one tracked activity: a name and the days it was done on.
//! - Map to and from the `user_activity` record family.
//!
//! # Invariants
//! - Values are immutable snapshots; every change yields a new value.
//! - `dates` hold UTC epoch milliseconds in insertion order.

use crate::model::ids::{LogicalId, StorageId};
use crate::store::{FamilySchema, FieldKind, FieldSpec, FieldValue, MappingError, Persistable, Record};
use serde::{Deserialize, Serialize};

/// Milliseconds in one UTC day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const NAME_FIELD: &str = "name";
const DATES_FIELD: &str = "dates";

static USER_ACTIVITY_SCHEMA: FamilySchema = FamilySchema::new(
    "user_activity",
    &[
        FieldSpec::new(NAME_FIELD, FieldKind::Text),
        FieldSpec::new(DATES_FIELD, FieldKind::IntegerList),
    ],
);

/// Start of the UTC day containing `epoch_ms`.
pub fn midnight_utc(epoch_ms: i64) -> i64 {
    epoch_ms.div_euclid(DAY_MS) * DAY_MS
}

pub fn is_same_utc_day(a_ms: i64, b_ms: i64) -> bool {
    midnight_utc(a_ms) == midnight_utc(b_ms)
}

/// Snapshot of one tracked activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    logical_id: LogicalId,
    storage_id: Option<StorageId>,
    name: String,
    dates: Vec<i64>,
}

impl UserActivity {
    /// Creates an unpersisted activity with a generated LogicalId.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(LogicalId::generate(), name)
    }

    /// Creates an unpersisted activity with a caller-provided LogicalId.
    pub fn with_id(logical_id: LogicalId, name: impl Into<String>) -> Self {
        Self {
            logical_id,
            storage_id: None,
            name: name.into(),
            dates: Vec::new(),
        }
    }

    pub fn id(&self) -> &LogicalId {
        &self.logical_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dates(&self) -> &[i64] {
        &self.dates
    }

    pub fn is_persisted(&self) -> bool {
        self.storage_id.is_some()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Appends `epoch_ms` to the date list.
    pub fn with_date(&self, epoch_ms: i64) -> Self {
        let mut dates = self.dates.clone();
        dates.push(epoch_ms);
        Self {
            dates,
            ..self.clone()
        }
    }

    /// Drops every date that falls on the same UTC day as `day_ms`.
    pub fn without_day(&self, day_ms: i64) -> Self {
        Self {
            dates: self
                .dates
                .iter()
                .copied()
                .filter(|date| !is_same_utc_day(*date, day_ms))
                .collect(),
            ..self.clone()
        }
    }

    pub fn is_tracked_on(&self, day_ms: i64) -> bool {
        self.dates.iter().any(|date| is_same_utc_day(*date, day_ms))
    }
}

impl Persistable for UserActivity {
    fn schema() -> &'static FamilySchema {
        &USER_ACTIVITY_SCHEMA
    }

    fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    fn storage_id(&self) -> Option<StorageId> {
        self.storage_id
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(Self {
            logical_id: record.logical_id().clone(),
            storage_id: record.storage_id(),
            name: record.text(NAME_FIELD)?.to_string(),
            dates: record.integer_list(DATES_FIELD)?.to_vec(),
        })
    }

    fn apply_to(&self, record: Record) -> Record {
        record
            .with_field(NAME_FIELD, FieldValue::Text(self.name.clone()))
            .with_field(DATES_FIELD, FieldValue::IntegerList(self.dates.clone()))
    }
}
