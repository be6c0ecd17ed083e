use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::utils::{from_millis, to_millis};

/// The fixed set of columns of the jobs table.
///
/// Column names in reporting filters and sparse updates are only ever taken
/// from this whitelist, never interpolated from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobColumn {
    Id,
    Priority,
    RepeatCount,
    RepeatInterval,
    Attempts,
    MaxAttempts,
    Queue,
    Handler,
    HandlerId,
    LastError,
    RunAt,
    LockedAt,
    FailedAt,
    LockedBy,
    CreatedAt,
    UpdatedAt,
}

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
    /// BIGINT milliseconds since the Unix epoch
    Timestamp,
}

impl JobColumn {
    pub const ALL: [JobColumn; 16] = [
        JobColumn::Id,
        JobColumn::Priority,
        JobColumn::RepeatCount,
        JobColumn::RepeatInterval,
        JobColumn::Attempts,
        JobColumn::MaxAttempts,
        JobColumn::Queue,
        JobColumn::Handler,
        JobColumn::HandlerId,
        JobColumn::LastError,
        JobColumn::RunAt,
        JobColumn::LockedAt,
        JobColumn::FailedAt,
        JobColumn::LockedBy,
        JobColumn::CreatedAt,
        JobColumn::UpdatedAt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobColumn::Id => "id",
            JobColumn::Priority => "priority",
            JobColumn::RepeatCount => "repeat_count",
            JobColumn::RepeatInterval => "repeat_interval",
            JobColumn::Attempts => "attempts",
            JobColumn::MaxAttempts => "max_attempts",
            JobColumn::Queue => "queue",
            JobColumn::Handler => "handler",
            JobColumn::HandlerId => "handler_id",
            JobColumn::LastError => "last_error",
            JobColumn::RunAt => "run_at",
            JobColumn::LockedAt => "locked_at",
            JobColumn::FailedAt => "failed_at",
            JobColumn::LockedBy => "locked_by",
            JobColumn::CreatedAt => "created_at",
            JobColumn::UpdatedAt => "updated_at",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            JobColumn::Id
            | JobColumn::Priority
            | JobColumn::RepeatCount
            | JobColumn::Attempts
            | JobColumn::MaxAttempts => ColumnKind::Integer,
            JobColumn::RepeatInterval
            | JobColumn::Queue
            | JobColumn::Handler
            | JobColumn::HandlerId
            | JobColumn::LastError
            | JobColumn::LockedBy => ColumnKind::Text,
            JobColumn::RunAt
            | JobColumn::LockedAt
            | JobColumn::FailedAt
            | JobColumn::CreatedAt
            | JobColumn::UpdatedAt => ColumnKind::Timestamp,
        }
    }

    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            JobColumn::RepeatInterval
                | JobColumn::Queue
                | JobColumn::LastError
                | JobColumn::RunAt
                | JobColumn::LockedAt
                | JobColumn::FailedAt
                | JobColumn::LockedBy
        )
    }

    /// Columns maintained by the store itself.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            JobColumn::Id | JobColumn::CreatedAt | JobColumn::UpdatedAt
        )
    }
}

impl Display for JobColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColumn(pub String);

impl Display for UnknownColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown column '{}'", self.0)
    }
}

impl FromStr for JobColumn {
    type Err = UnknownColumn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        JobColumn::ALL
            .into_iter()
            .find(|column| column.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownColumn(s.to_string()))
    }
}

/// A value bound to a column. Timestamps travel as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(Option<i64>),
    Text(Option<String>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Int(None) | SqlValue::Text(None))
    }

    /// Converts a JSON value for `column`.
    ///
    /// Timestamps accept epoch milliseconds or RFC 3339 strings; integers
    /// accept numeric strings.
    pub fn from_json(column: JobColumn, value: &Value) -> Result<SqlValue, String> {
        let mismatch = |expected: &str| format!("column '{column}' expects {expected}, got {value}");
        match (column.kind(), value) {
            (ColumnKind::Integer | ColumnKind::Timestamp, Value::Null) => Ok(SqlValue::Int(None)),
            (ColumnKind::Text, Value::Null) => Ok(SqlValue::Text(None)),
            (ColumnKind::Integer | ColumnKind::Timestamp, Value::Number(n)) => n
                .as_i64()
                .map(|n| SqlValue::Int(Some(n)))
                .ok_or_else(|| mismatch("an integer")),
            (ColumnKind::Integer, Value::String(s)) => s
                .trim()
                .parse()
                .map(|n| SqlValue::Int(Some(n)))
                .map_err(|_| mismatch("an integer")),
            (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| SqlValue::Int(Some(t.timestamp_millis())))
                .map_err(|_| mismatch("a timestamp")),
            (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(Some(s.clone()))),
            (ColumnKind::Text, Value::Number(n)) => Ok(SqlValue::Text(Some(n.to_string()))),
            (ColumnKind::Text, _) => Err(mismatch("a string")),
            (_, _) => Err(mismatch("an integer")),
        }
    }

    /// Checks the value has the storage class of `column`.
    pub fn fits(&self, column: JobColumn) -> bool {
        match (self, column.kind()) {
            (SqlValue::Int(_), ColumnKind::Integer | ColumnKind::Timestamp) => true,
            (SqlValue::Text(_), ColumnKind::Text) => true,
            _ => false,
        }
    }

    /// Renders a stored value of `column` as JSON, timestamps as RFC 3339.
    pub(crate) fn into_json(self, column: JobColumn) -> Value {
        match self {
            SqlValue::Int(None) | SqlValue::Text(None) => Value::Null,
            SqlValue::Int(Some(ms)) if column.kind() == ColumnKind::Timestamp => {
                Value::String(from_millis(ms).to_rfc3339())
            }
            SqlValue::Int(Some(n)) => Value::from(n),
            SqlValue::Text(Some(s)) => Value::String(s),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(Some(value))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(Some(value.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(Some(value))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        SqlValue::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Int(Some(to_millis(value)))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        SqlValue::Int(value.map(to_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_names_parse_back() {
        for column in JobColumn::ALL {
            assert_eq!(column.as_str().parse::<JobColumn>(), Ok(column));
        }
        assert_eq!("PRIORITY".parse::<JobColumn>(), Ok(JobColumn::Priority));
        assert_eq!(
            "priority; drop table x".parse::<JobColumn>(),
            Err(UnknownColumn("priority; drop table x".into()))
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            SqlValue::from_json(JobColumn::Priority, &json!(5)),
            Ok(SqlValue::Int(Some(5)))
        );
        assert_eq!(
            SqlValue::from_json(JobColumn::Attempts, &json!("3")),
            Ok(SqlValue::Int(Some(3)))
        );
        assert_eq!(
            SqlValue::from_json(JobColumn::Queue, &Value::Null),
            Ok(SqlValue::Text(None))
        );
        assert_eq!(
            SqlValue::from_json(JobColumn::RunAt, &json!("1970-01-01T00:00:01Z")),
            Ok(SqlValue::Int(Some(1000)))
        );
        assert!(SqlValue::from_json(JobColumn::Priority, &json!("high")).is_err());
        assert!(SqlValue::from_json(JobColumn::Queue, &json!(["a"])).is_err());
        assert!(SqlValue::from_json(JobColumn::Priority, &json!(1.5)).is_err());
    }

    #[test]
    fn test_into_json_renders_timestamps() {
        assert_eq!(
            SqlValue::Int(Some(0)).into_json(JobColumn::RunAt),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(SqlValue::Int(Some(7)).into_json(JobColumn::Attempts), json!(7));
        assert_eq!(SqlValue::Text(None).into_json(JobColumn::Queue), Value::Null);
    }
}
