use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::columns::{JobColumn, SqlValue};
use crate::errors::{DelayedWorkerError, Result};

/// Prefix marking a key of a superset map as "to be written".
pub const SET_MARKER: char = '@';

/// A sparse set of column assignments applied by [`JobStore::update`](crate::JobStore::update).
///
/// `updated_at` is always stamped by the store and cannot be assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    assignments: Vec<(JobColumn, SqlValue)>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to `column`, replacing an earlier assignment of the same column.
    pub fn set(mut self, column: JobColumn, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        match self.assignments.iter_mut().find(|(c, _)| *c == column) {
            Some(assignment) => assignment.1 = value,
            None => self.assignments.push((column, value)),
        }
        self
    }

    pub fn attempts(self, attempts: i64) -> Self {
        self.set(JobColumn::Attempts, attempts)
    }

    pub fn priority(self, priority: i64) -> Self {
        self.set(JobColumn::Priority, priority)
    }

    pub fn run_at(self, run_at: Option<DateTime<Utc>>) -> Self {
        self.set(JobColumn::RunAt, run_at)
    }

    pub fn failed_at(self, failed_at: Option<DateTime<Utc>>) -> Self {
        self.set(JobColumn::FailedAt, failed_at)
    }

    pub fn last_error(self, last_error: Option<String>) -> Self {
        self.set(JobColumn::LastError, last_error)
    }

    pub fn clear_lock(self) -> Self {
        self.set(JobColumn::LockedAt, None::<i64>)
            .set(JobColumn::LockedBy, None::<String>)
    }

    /// Builds an update from a superset map: only keys prefixed with
    /// [`SET_MARKER`] are applied, every other key is ignored.
    ///
    /// ```
    /// use delayed_worker::{JobColumn, JobUpdate};
    /// use serde_json::json;
    ///
    /// let params = json!({"@attempts": 2, "@last_error": "boom", "id": 7});
    /// let update = JobUpdate::from_marked(params.as_object().unwrap()).unwrap();
    /// assert_eq!(update.columns(), vec![JobColumn::Attempts, JobColumn::LastError]);
    /// ```
    pub fn from_marked(params: &Map<String, Value>) -> Result<Self> {
        let mut update = JobUpdate::new();
        for (key, value) in params {
            let Some(name) = key.strip_prefix(SET_MARKER) else {
                continue;
            };
            let column: JobColumn = name
                .parse()
                .map_err(|e| DelayedWorkerError::InvalidUpdate(format!("{e}")))?;
            let value = SqlValue::from_json(column, value).map_err(DelayedWorkerError::InvalidUpdate)?;
            update = update.set(column, value);
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignments(&self) -> &[(JobColumn, SqlValue)] {
        &self.assignments
    }

    pub fn columns(&self) -> Vec<JobColumn> {
        self.assignments.iter().map(|(c, _)| *c).collect()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (column, value) in &self.assignments {
            if column.is_read_only() {
                return Err(DelayedWorkerError::InvalidUpdate(format!(
                    "column '{column}' is maintained by the store"
                )));
            }
            if !value.fits(*column) {
                return Err(DelayedWorkerError::InvalidUpdate(format!(
                    "value {value:?} does not fit column '{column}'"
                )));
            }
            if value.is_null() && !column.is_nullable() {
                return Err(DelayedWorkerError::InvalidUpdate(format!(
                    "column '{column}' cannot be null"
                )));
            }
        }
        Ok(())
    }
}
