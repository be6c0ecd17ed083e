use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use delayed_worker_handler::{Attributes, BuildHandlerError, BoxedHandler, Handler};
use futures::FutureExt;
use getset::Getters;
use once_cell::sync::OnceCell;
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use tracing::warn;

use crate::errors::{DelayedWorkerError, Result};
use crate::job_update::JobUpdate;
use crate::store::JobStore;
use crate::utils::{duration_millis, from_millis, parse_duration};

/// Shortest `try_interval` honoured; anything below falls back to the
/// attempts based backoff.
pub const MIN_TRY_INTERVAL: Duration = Duration::from_secs(5);

/// Errors raised while running one job.
///
/// These never escape a worker loop: they are turned into a reschedule or a
/// permanent failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Cannot deserialize job payload: {0}")]
    Deserialize(String),
    #[error("Cannot build job handler: {0}")]
    Build(#[from] BuildHandlerError),
    #[error("{0}")]
    Perform(String),
    #[error("Job handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Errors that would recur on every attempt and bypass retries.
    pub fn is_deserialization(&self) -> bool {
        matches!(self, JobError::Deserialize(_) | JobError::Build(_))
    }
}

/// A job row as stored. Timestamps are epoch milliseconds.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DbJob {
    pub(crate) id: i64,
    pub(crate) priority: i64,
    pub(crate) repeat_count: i64,
    pub(crate) repeat_interval: Option<String>,
    pub(crate) attempts: i64,
    pub(crate) max_attempts: i64,
    pub(crate) queue: Option<String>,
    pub(crate) handler: String,
    pub(crate) handler_id: String,
    pub(crate) last_error: Option<String>,
    pub(crate) run_at: Option<i64>,
    pub(crate) locked_at: Option<i64>,
    pub(crate) failed_at: Option<i64>,
    pub(crate) locked_by: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

/// A unit of deferred work.
///
/// A `Job` is a transient view of a row: state transitions mutate it in
/// memory and write through the [`JobStore`].
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Job {
    /// Store assigned identity, absent until persisted
    id: Option<i64>,
    /// Lower values are scheduled first
    priority: i64,
    repeat_count: i64,
    repeat_interval: Option<String>,
    /// Failed attempts so far
    attempts: i64,
    /// Per-job override of the worker default, `<= 0` when unset
    max_attempts: i64,
    queue: Option<String>,
    /// Serialized JSON payload `{type, ...options}`
    handler: String,
    /// Idempotency key
    handler_id: String,
    last_error: Option<String>,
    run_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    failed_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[getset(skip)]
    parsed_attributes: OnceCell<Attributes>,
    #[getset(skip)]
    built_handler: Option<BoxedHandler>,
}

fn optional_time(millis: Option<i64>) -> Option<DateTime<Utc>> {
    // Zero is a legacy spelling of "no time"
    millis.filter(|ms| *ms != 0).map(from_millis)
}

impl From<DbJob> for Job {
    fn from(db_job: DbJob) -> Self {
        Job {
            id: Some(db_job.id),
            priority: db_job.priority,
            repeat_count: db_job.repeat_count,
            repeat_interval: db_job.repeat_interval,
            attempts: db_job.attempts,
            max_attempts: db_job.max_attempts,
            queue: db_job.queue,
            handler: db_job.handler,
            handler_id: db_job.handler_id,
            last_error: db_job.last_error,
            run_at: optional_time(db_job.run_at),
            locked_at: optional_time(db_job.locked_at),
            locked_by: db_job.locked_by,
            failed_at: optional_time(db_job.failed_at),
            created_at: Some(from_millis(db_job.created_at)),
            updated_at: Some(from_millis(db_job.updated_at)),
            parsed_attributes: OnceCell::new(),
            built_handler: None,
        }
    }
}

impl Job {
    pub fn from_db_job(db_job: DbJob) -> Job {
        db_job.into()
    }

    /// A job that has not been written to the store.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn pending(
        priority: i64,
        repeat_count: i64,
        repeat_interval: Option<String>,
        max_attempts: i64,
        queue: Option<String>,
        handler: String,
        handler_id: String,
        run_at: Option<DateTime<Utc>>,
    ) -> Job {
        Job {
            id: None,
            priority,
            repeat_count,
            repeat_interval,
            attempts: 0,
            max_attempts,
            queue,
            handler,
            handler_id,
            last_error: None,
            run_at,
            locked_at: None,
            locked_by: None,
            failed_at: None,
            created_at: None,
            updated_at: None,
            parsed_attributes: OnceCell::new(),
            built_handler: None,
        }
    }

    pub(crate) fn mark_persisted(&mut self, id: i64, now: DateTime<Utc>) {
        self.id = Some(id);
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    fn persisted_id(&self) -> Result<i64> {
        self.id.ok_or(DelayedWorkerError::NotPersisted)
    }

    /// The payload, parsed on first access and cached.
    pub fn attributes(&self) -> std::result::Result<&Attributes, JobError> {
        self.parsed_attributes.get_or_try_init(|| {
            match serde_json::from_str::<Value>(&self.handler) {
                Ok(Value::Object(attributes)) => Ok(attributes),
                Ok(other) => Err(JobError::Deserialize(format!(
                    "expected a JSON object, got {other}"
                ))),
                Err(e) => Err(JobError::Deserialize(e.to_string())),
            }
        })
    }

    /// Display label: the payload's `name`, then its `type`, else `unknown`.
    pub fn name(&self) -> String {
        self.attributes()
            .ok()
            .and_then(|attributes| {
                ["name", "type"].into_iter().find_map(|key| {
                    attributes
                        .get(key)
                        .and_then(Value::as_str)
                        .filter(|label| !label.is_empty())
                })
            })
            .unwrap_or("unknown")
            .to_string()
    }

    /// The per-job attempt limit, or `-1` when the worker default applies.
    pub fn max_attempts_override(&self) -> i64 {
        if self.max_attempts > 0 {
            self.max_attempts
        } else {
            -1
        }
    }

    pub fn effective_max_attempts(&self, worker_default: i64) -> i64 {
        match self.max_attempts_override() {
            -1 => worker_default,
            max_attempts => max_attempts,
        }
    }

    /// The payload's `try_interval`, when present and parseable.
    pub fn try_interval(&self) -> Option<Duration> {
        let value = self.attributes().ok()?.get("try_interval")?;
        let parsed = match value {
            Value::String(s) => parse_duration(s).ok(),
            Value::Number(n) => n.as_u64().map(Duration::from_secs),
            _ => None,
        };
        if parsed.is_none() {
            warn!(handler_id = %self.handler_id, %value, "Ignoring invalid try_interval");
        }
        parsed
    }

    /// Delay before the next attempt: `try_interval` when it is at least
    /// [`MIN_TRY_INTERVAL`], else `attempts * 10s + 5s`.
    pub fn backoff(&self) -> Duration {
        match self.try_interval() {
            Some(interval) if interval >= MIN_TRY_INTERVAL => interval,
            _ => {
                let attempts = u64::try_from(self.attempts).unwrap_or_default();
                Duration::from_secs(attempts.saturating_mul(10).saturating_add(5))
            }
        }
    }

    /// Next run time: the store's current time plus [`Job::backoff`].
    pub async fn reschedule_at(&self, store: &JobStore) -> Result<DateTime<Utc>> {
        let now = store.now_millis().await?;
        Ok(self.next_run_at(now))
    }

    /// `now` plus [`Job::backoff`], saturating at the latest representable time.
    pub(crate) fn next_run_at(&self, now: i64) -> DateTime<Utc> {
        from_millis(now.saturating_add(duration_millis(self.backoff())))
    }

    /// Builds the handler through the store's registry, once per job.
    pub fn payload_handler(
        &mut self,
        store: &JobStore,
        worker_name: Option<&str>,
    ) -> std::result::Result<&dyn Handler, JobError> {
        let handler = match self.built_handler.take() {
            Some(handler) => handler,
            None => {
                let context = store.handler_context(worker_name);
                store.registry().build(&context, self.attributes()?)?
            }
        };
        Ok(&**self.built_handler.insert(handler))
    }

    /// Runs the payload handler. A panicking handler is reported as
    /// [`JobError::Panicked`].
    pub async fn invoke(
        &mut self,
        store: &JobStore,
        worker_name: Option<&str>,
    ) -> std::result::Result<(), JobError> {
        let handler = self.payload_handler(store, worker_name)?;
        match AssertUnwindSafe(handler.perform()).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(JobError::Perform(message)),
            Err(panic) => Err(JobError::Panicked(panic_message(&*panic))),
        }
    }

    /// Pushes the job back: one more attempt, lock released, runs at `next_time`.
    pub async fn reschedule_it(
        &mut self,
        store: &JobStore,
        next_time: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let id = self.persisted_id()?;
        let attempts = self.attempts.saturating_add(1);
        store
            .update(
                id,
                JobUpdate::new()
                    .attempts(attempts)
                    .run_at(Some(next_time))
                    .last_error(Some(error.to_string()))
                    .clear_lock(),
            )
            .await?;

        self.attempts = attempts;
        self.run_at = Some(next_time);
        self.last_error = Some(error.to_string());
        self.locked_at = None;
        self.locked_by = None;
        Ok(())
    }

    /// Marks the job permanently failed, keeping the row.
    pub async fn fail_it(&mut self, store: &JobStore, error: &str) -> Result<()> {
        let id = self.persisted_id()?;
        let now = store.now().await?;
        store
            .update(
                id,
                JobUpdate::new()
                    .failed_at(Some(now))
                    .last_error(Some(error.to_string()))
                    .clear_lock(),
            )
            .await?;

        self.failed_at = Some(now);
        self.last_error = Some(error.to_string());
        self.locked_at = None;
        self.locked_by = None;
        Ok(())
    }

    pub async fn destroy_it(&self, store: &JobStore) -> Result<()> {
        store.destroy(self.persisted_id()?).await
    }

    /// Returns a failed job to the pending state, due now.
    pub async fn retry_it(&mut self, store: &JobStore) -> Result<()> {
        let id = self.persisted_id()?;
        let now = store.retry_at_now(id).await?;

        self.failed_at = None;
        self.locked_at = None;
        self.locked_by = None;
        self.run_at = Some(now);
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Clone for Job {
    /// Clones the row data; the built handler is not shared.
    fn clone(&self) -> Self {
        Job {
            id: self.id,
            priority: self.priority,
            repeat_count: self.repeat_count,
            repeat_interval: self.repeat_interval.clone(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            queue: self.queue.clone(),
            handler: self.handler.clone(),
            handler_id: self.handler_id.clone(),
            last_error: self.last_error.clone(),
            run_at: self.run_at,
            locked_at: self.locked_at,
            locked_by: self.locked_by.clone(),
            failed_at: self.failed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            parsed_attributes: self.parsed_attributes.clone(),
            built_handler: None,
        }
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("queue", &self.queue)
            .field("handler", &self.handler)
            .field("handler_id", &self.handler_id)
            .field("last_error", &self.last_error)
            .field("run_at", &self.run_at)
            .field("locked_at", &self.locked_at)
            .field("locked_by", &self.locked_by)
            .field("failed_at", &self.failed_at)
            .finish_non_exhaustive()
    }
}
