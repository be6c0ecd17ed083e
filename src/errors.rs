use delayed_worker_dialect::Dialect;
use thiserror::Error;

use crate::job::JobError;

/// Errors that can occur during job store operations.
///
/// This enum represents the failures of the storage layer: the database
/// itself, payload serialization, and malformed reporting or update requests.
#[derive(Error, Debug)]
pub enum DelayedWorkerError {
    /// An error occurred while executing an SQL query.
    ///
    /// `message` is the driver message, already transcoded to UTF-8 for
    /// dialects whose server reports errors in a legacy encoding.
    #[error("Error occured while query: {message}")]
    SqlError {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// An error occurred while serializing or deserializing JSON data
    #[error("Error while serializing params: {0}")]
    JsonSerializeError(#[from] serde_json::Error),

    /// The payload handed to `enqueue` cannot be stored as a job handler
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// A reporting filter is malformed
    #[error("Invalid query filter: {0}")]
    InvalidFilter(String),

    /// A sparse update names an unknown or read-only column, or an invalid value
    #[error("Invalid job update: {0}")]
    InvalidUpdate(String),

    /// The job has not been written to the store yet
    #[error("Job has no id, it was never persisted")]
    NotPersisted,

    /// A job executed synchronously (deferred persistence disabled) failed
    #[error("Job failed while running synchronously: {0}")]
    Job(#[from] JobError),
}

/// A Result type alias for DelayedWorkerError.
pub type Result<T> = core::result::Result<T, DelayedWorkerError>;

impl DelayedWorkerError {
    pub(crate) fn sql(dialect: Dialect, source: sqlx::Error) -> Self {
        let message = match &source {
            sqlx::Error::Database(db_error) => dialect.transcode_error_message(db_error.message()),
            other => dialect.transcode_error_message(&other.to_string()),
        };
        DelayedWorkerError::SqlError { message, source }
    }
}

/// Maps driver errors into [`DelayedWorkerError::SqlError`] for a dialect.
pub(crate) trait SqlResultExt<T> {
    fn in_dialect(self, dialect: Dialect) -> Result<T>;
}

impl<T> SqlResultExt<T> for core::result::Result<T, sqlx::Error> {
    fn in_dialect(self, dialect: Dialect) -> Result<T> {
        self.map_err(|e| DelayedWorkerError::sql(dialect, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_message_is_transcoded_for_legacy_dialect() {
        // "表" encoded as GBK, then read back byte by byte as Latin-1
        let mojibake: String = [0xB1u8, 0xED].iter().map(|b| char::from(*b)).collect();
        let source = sqlx::Error::Protocol(format!("Table '{mojibake}' doesn't exist"));

        let error = DelayedWorkerError::sql(Dialect::MySqlLegacy, source);
        match error {
            DelayedWorkerError::SqlError { message, .. } => {
                assert!(message.contains("表"), "got {message}")
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_sql_error_message_untouched_for_utf8_dialects() {
        let source = sqlx::Error::Protocol("Table 'é' doesn't exist".into());
        let error = DelayedWorkerError::sql(Dialect::MySql, source);
        assert_eq!(
            error.to_string(),
            "Error occured while query: encountered unexpected or invalid data: Table 'é' doesn't exist"
        );
    }
}
