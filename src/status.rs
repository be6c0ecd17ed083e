use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use getset::Getters;

pub const STATUS_OK: &str = "ok";

/// Latest health report of the workers sharing a [`StatusBoard`].
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct StatusReport {
    /// `ok`, or the message of the last infrastructure error
    message: String,
    /// Infrastructure errors since the last successful poll
    consecutive_errors: u64,
    updated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn is_ok(&self) -> bool {
        self.consecutive_errors == 0
    }
}

/// Shared health status written by worker loops.
///
/// An infrastructure error (the store could not be queried) puts the board in
/// an error state carrying the message; the next successful poll resets it.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusReport>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        StatusBoard {
            inner: Arc::new(RwLock::new(StatusReport {
                message: STATUS_OK.to_string(),
                consecutive_errors: 0,
                updated_at: Utc::now(),
            })),
        }
    }

    pub fn report_ok(&self) {
        let mut report = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if report.consecutive_errors == 0 && report.message == STATUS_OK {
            return;
        }
        report.message = STATUS_OK.to_string();
        report.consecutive_errors = 0;
        report.updated_at = Utc::now();
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let mut report = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        report.message = message.into();
        report.consecutive_errors += 1;
        report.updated_at = Utc::now();
    }

    pub fn current(&self) -> StatusReport {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn message(&self) -> String {
        self.current().message
    }

    pub fn is_ok(&self) -> bool {
        self.current().is_ok()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_then_recovery() {
        let board = StatusBoard::new();
        assert!(board.is_ok());
        assert_eq!(board.message(), STATUS_OK);

        let shared = board.clone();
        shared.report_error("connection refused");
        shared.report_error("connection refused again");
        let report = board.current();
        assert!(!report.is_ok());
        assert_eq!(report.message(), "connection refused again");
        assert_eq!(*report.consecutive_errors(), 2);

        board.report_ok();
        assert!(shared.is_ok());
        assert_eq!(shared.message(), STATUS_OK);
    }
}
