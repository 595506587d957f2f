//! Activity use-case service.
//!
//! # Responsibility
//! - Provide activity-level entry points (create by name, mark a day done,
//!   rename) on top of `DataService<UserActivity>`.
//!
//! # Invariants
//! - Activity names are never blank.
//! - Marking a day twice stores one date for that day.

use crate::model::activity::UserActivity;
use crate::model::ids::LogicalId;
use crate::service::data_service::DataService;
use crate::store::{StoreError, StoreResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ActivityResult<T> = Result<T, ActivityError>;

#[derive(Debug)]
pub enum ActivityError {
    /// Name is blank after trim.
    InvalidName,
    /// No cached activity with this id.
    NotFound(LogicalId),
    Store(StoreError),
}

impl Display for ActivityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "activity name must not be blank"),
            Self::NotFound(id) => write!(f, "activity not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ActivityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ActivityError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Activity facade over the generic data service.
pub struct ActivityService {
    data: DataService<UserActivity>,
    clock: Clock,
}

impl ActivityService {
    pub fn new(data: DataService<UserActivity>) -> Self {
        Self::with_clock(data, system_now_ms)
    }

    /// Uses `clock` (epoch milliseconds) instead of the system time.
    pub fn with_clock(
        data: DataService<UserActivity>,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            data,
            clock: Box::new(clock),
        }
    }

    pub fn data(&self) -> &DataService<UserActivity> {
        &self.data
    }

    pub fn activities(&self) -> Vec<UserActivity> {
        self.data.values()
    }

    /// Creates and persists an activity already marked done today.
    pub fn create_named(&self, name: &str) -> ActivityResult<UserActivity> {
        let name = normalize_name(name)?;
        let draft = self.data.create()?;
        let activity = draft.renamed(name).with_date((self.clock)());
        Ok(self.data.update(&activity)?)
    }

    /// Adds `at_ms` unless the activity is already tracked on that UTC day.
    pub fn mark_done(&self, id: &LogicalId, at_ms: i64) -> ActivityResult<UserActivity> {
        let current = self.require(id)?;
        if current.is_tracked_on(at_ms) {
            return Ok(current);
        }
        Ok(self.data.update(&current.with_date(at_ms))?)
    }

    /// Marks the activity done at the current time.
    pub fn mark_done_now(&self, id: &LogicalId) -> ActivityResult<UserActivity> {
        self.mark_done(id, (self.clock)())
    }

    /// Removes every date on the UTC day of `day_ms`.
    pub fn unmark(&self, id: &LogicalId, day_ms: i64) -> ActivityResult<UserActivity> {
        let current = self.require(id)?;
        if !current.is_tracked_on(day_ms) {
            return Ok(current);
        }
        Ok(self.data.update(&current.without_day(day_ms))?)
    }

    pub fn rename(&self, id: &LogicalId, name: &str) -> ActivityResult<UserActivity> {
        let name = normalize_name(name)?;
        let current = self.require(id)?;
        Ok(self.data.update(&current.renamed(name))?)
    }

    pub fn remove(&self, id: &LogicalId) -> StoreResult<bool> {
        self.data.delete(id)
    }

    fn require(&self, id: &LogicalId) -> ActivityResult<UserActivity> {
        self.data
            .get(id)
            .ok_or_else(|| ActivityError::NotFound(id.clone()))
    }
}

fn normalize_name(name: &str) -> ActivityResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ActivityError::InvalidName);
    }
    Ok(trimmed.to_string())
}

fn system_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
