use std::time::Duration;

use rand::RngCore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::status::StatusBoard;
use crate::store::{JobStore, UNBOUNDED_PRIORITY};
use crate::Worker;

pub const DEFAULT_MAX_ATTEMPTS: i64 = 25;
pub const DEFAULT_MAX_RUN_TIME: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_SLEEP_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Configuration options for a [`Worker`].
///
/// Every option has a default; only the store is required.
#[derive(Debug)]
pub struct WorkerOptions {
    store: Option<JobStore>,
    name: Option<String>,
    min_priority: i64,
    max_priority: i64,
    max_attempts: Option<i64>,
    max_run_time: Option<Duration>,
    sleep_delay: Option<Duration>,
    queues: Vec<String>,
    exit_on_complete: bool,
    destroy_failed_jobs: bool,
    batch_size: Option<usize>,
    clear_locks_on_shutdown: bool,
    listen_os_shutdown_signals: bool,
    status: Option<StatusBoard>,
    shutdown_token: Option<CancellationToken>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            store: None,
            name: None,
            min_priority: UNBOUNDED_PRIORITY,
            max_priority: UNBOUNDED_PRIORITY,
            max_attempts: None,
            max_run_time: None,
            sleep_delay: None,
            queues: Vec::new(),
            exit_on_complete: false,
            destroy_failed_jobs: false,
            batch_size: None,
            clear_locks_on_shutdown: true,
            listen_os_shutdown_signals: true,
            status: None,
            shutdown_token: None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WorkerBuildError {
    #[error("Missing store configuration - a worker needs a JobStore")]
    MissingStore,

    #[error("Invalid worker option '{option}': {reason}")]
    InvalidOption { option: &'static str, reason: String },
}

/// `delayed_worker_<18 hex chars>`
pub fn random_worker_name() -> String {
    let mut random_bytes = [0u8; 9];
    rand::rng().fill_bytes(&mut random_bytes);
    format!("delayed_worker_{}", hex::encode(random_bytes))
}

impl WorkerOptions {
    /// Builds the worker.
    ///
    /// # Errors
    ///
    /// Fails without a store, with a zero `max_attempts` or `batch_size`, or an
    /// empty `name`.
    pub fn init(self) -> Result<Worker, WorkerBuildError> {
        let store = self.store.ok_or(WorkerBuildError::MissingStore)?;

        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts <= 0 {
            return Err(WorkerBuildError::InvalidOption {
                option: "max_attempts",
                reason: format!("must be positive, got {max_attempts}"),
            });
        }
        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(WorkerBuildError::InvalidOption {
                option: "batch_size",
                reason: "must be positive".to_string(),
            });
        }
        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(WorkerBuildError::InvalidOption {
                    option: "name",
                    reason: "must not be empty".to_string(),
                })
            }
            Some(name) => name,
            None => random_worker_name(),
        };

        Ok(Worker {
            name,
            store,
            min_priority: self.min_priority,
            max_priority: self.max_priority,
            max_attempts,
            max_run_time: self.max_run_time.unwrap_or(DEFAULT_MAX_RUN_TIME),
            sleep_delay: self.sleep_delay.unwrap_or(DEFAULT_SLEEP_DELAY),
            queues: self.queues,
            exit_on_complete: self.exit_on_complete,
            destroy_failed_jobs: self.destroy_failed_jobs,
            batch_size,
            clear_locks_on_shutdown: self.clear_locks_on_shutdown,
            listen_os_shutdown_signals: self.listen_os_shutdown_signals,
            status: self.status.unwrap_or_default(),
            shutdown_token: self.shutdown_token.unwrap_or_default(),
        })
    }

    pub fn store(mut self, value: JobStore) -> Self {
        self.store = Some(value);
        self
    }

    /// Lock holder identity. Keep it stable across restarts to resume jobs
    /// this worker held when it stopped.
    pub fn name(mut self, value: &str) -> Self {
        self.name = Some(value.into());
        self
    }

    /// Lowest priority this worker runs, `-1` for no bound.
    pub fn min_priority(mut self, value: i64) -> Self {
        self.min_priority = value;
        self
    }

    /// Highest priority this worker runs, `-1` for no bound.
    pub fn max_priority(mut self, value: i64) -> Self {
        self.max_priority = value;
        self
    }

    pub fn max_attempts(mut self, value: i64) -> Self {
        self.max_attempts = Some(value);
        self
    }

    /// Lock staleness window: a lock older than this may be taken over by
    /// another worker.
    pub fn max_run_time(mut self, value: Duration) -> Self {
        self.max_run_time = Some(value);
        self
    }

    /// Idle time between polls that found no work.
    pub fn sleep_delay(mut self, value: Duration) -> Self {
        self.sleep_delay = Some(value);
        self
    }

    pub fn add_queue(mut self, value: &str) -> Self {
        self.queues.push(value.into());
        self
    }

    pub fn queues<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = values.into_iter().map(Into::into).collect();
        self
    }

    /// Stop instead of sleeping once a batch finds no work.
    pub fn exit_on_complete(mut self, value: bool) -> Self {
        self.exit_on_complete = value;
        self
    }

    /// Delete permanently failed jobs instead of keeping them with `failed_at`.
    pub fn destroy_failed_jobs(mut self, value: bool) -> Self {
        self.destroy_failed_jobs = value;
        self
    }

    /// Jobs run per poll before the next one.
    pub fn batch_size(mut self, value: usize) -> Self {
        self.batch_size = Some(value);
        self
    }

    /// Release the locks held by this worker when it stops. Defaults to `true`.
    pub fn clear_locks_on_shutdown(mut self, value: bool) -> Self {
        self.clear_locks_on_shutdown = value;
        self
    }

    /// Stop on SIGINT, SIGTERM and friends. Defaults to `true`.
    pub fn listen_os_shutdown_signals(mut self, value: bool) -> Self {
        self.listen_os_shutdown_signals = value;
        self
    }

    /// Shares a status board between workers.
    pub fn status_board(mut self, value: StatusBoard) -> Self {
        self.status = Some(value);
        self
    }

    /// Uses `value` as the shutdown token, so one token can stop many workers.
    pub fn shutdown_token(mut self, value: CancellationToken) -> Self {
        self.shutdown_token = Some(value);
        self
    }
}
