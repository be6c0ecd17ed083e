use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use delayed_worker_shutdown_signal::shutdown_signal;
use getset::Getters;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::builder::WorkerOptions;
use crate::errors::DelayedWorkerError;
use crate::job::Job;
use crate::status::StatusBoard;
use crate::store::{JobStore, ReserveRequest};

/// A polling loop that reserves jobs from one [`JobStore`] and runs them.
///
/// A worker runs one job at a time. Run several workers (with distinct names)
/// against the same store for parallelism; they coordinate only through the
/// store's row locks.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    /// Lock holder identity
    pub(crate) name: String,
    pub(crate) store: JobStore,
    /// Lowest priority this worker runs, `-1` for no bound
    pub(crate) min_priority: i64,
    /// Highest priority this worker runs, `-1` for no bound
    pub(crate) max_priority: i64,
    /// Default attempt limit for jobs without an override
    pub(crate) max_attempts: i64,
    /// Lock staleness window
    pub(crate) max_run_time: Duration,
    /// Idle time between polls that found no work
    pub(crate) sleep_delay: Duration,
    /// Queues this worker serves, empty for all
    pub(crate) queues: Vec<String>,
    pub(crate) exit_on_complete: bool,
    pub(crate) destroy_failed_jobs: bool,
    /// Jobs run per poll
    pub(crate) batch_size: usize,
    pub(crate) clear_locks_on_shutdown: bool,
    pub(crate) listen_os_shutdown_signals: bool,
    pub(crate) status: StatusBoard,
    #[getset(skip)]
    pub(crate) shutdown_token: CancellationToken,
}

/// Errors that end a worker loop.
#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    /// Releasing this worker's locks on shutdown failed
    #[error("Failed to release the locks of worker '{worker_name}': {source}")]
    ClearLocks {
        worker_name: String,
        #[source]
        source: DelayedWorkerError,
    },
    /// The task driving a started worker panicked or was aborted
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What became of a job handed to [`Worker::run_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The handler succeeded and the row was deleted
    Completed,
    /// The handler failed and the job will run again at `run_at`
    Rescheduled {
        attempts: i64,
        run_at: DateTime<Utc>,
    },
    /// Permanently failed, kept with `failed_at` set
    Failed,
    /// Permanently failed and deleted
    Destroyed,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Counters of one [`Worker::work_off`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkOffStats {
    pub succeeded: usize,
    pub failed: usize,
}

impl WorkOffStats {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl Worker {
    /// Creates a new `WorkerOptions` builder with default settings.
    ///
    /// ```no_run
    /// use delayed_worker::{JobStore, Worker};
    /// use std::time::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = JobStore::options()
    ///     .database_url("sqlite://jobs.db?mode=rwc")
    ///     .init()
    ///     .await?;
    /// let worker = Worker::options()
    ///     .store(store)
    ///     .name("mailer-1")
    ///     .sleep_delay(Duration::from_secs(1))
    ///     .init()?;
    /// worker.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    pub fn reserve_request(&self) -> ReserveRequest {
        ReserveRequest::new(self.name.clone())
            .min_priority(self.min_priority)
            .max_priority(self.max_priority)
            .queues(self.queues.iter().cloned())
            .max_run_time(self.max_run_time)
    }

    /// Asks the loop to stop after the job it is running, if any.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Runs the loop until shutdown, or until a batch finds no work when
    /// `exit_on_complete` is set.
    ///
    /// Store errors never end the loop: they are logged, recorded on the
    /// status board, and the loop sleeps before polling again.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        info!(
            worker_name = %self.name,
            queues = ?self.queues,
            min_priority = self.min_priority,
            max_priority = self.max_priority,
            "Worker started"
        );
        let signal_listener = self.listen_for_os_signals();

        loop {
            if self.is_shutting_down() {
                break;
            }

            match self.work_off(self.batch_size).await {
                Ok(stats) => {
                    self.status.report_ok();
                    if stats.total() > 0 {
                        debug!(
                            worker_name = %self.name,
                            succeeded = stats.succeeded,
                            failed = stats.failed,
                            "Batch processed"
                        );
                        continue;
                    }
                    if self.exit_on_complete {
                        info!(worker_name = %self.name, "No more jobs available, exiting");
                        break;
                    }
                }
                Err(e) => {
                    error!(worker_name = %self.name, error = %e, "Error while polling for jobs");
                    self.status.report_error(e.to_string());
                }
            }

            trace!(worker_name = %self.name, sleep_delay = ?self.sleep_delay, "Sleeping");
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.sleep_delay) => {}
            }
        }

        if let Some(listener) = signal_listener {
            listener.abort();
        }
        let result = self.release_locks().await;
        info!(worker_name = %self.name, "Worker stopped");
        result
    }

    /// Spawns [`Worker::run`] and returns a handle to stop and await it.
    ///
    /// Once the loop ends the worker's store handle is released, closing the
    /// pool when no other handle shares it.
    pub fn start(self) -> WorkerHandle {
        let shutdown_token = self.shutdown_token.clone();
        let join_handle = tokio::spawn(async move {
            let result = self.run().await;
            self.store.release().await;
            result
        });
        WorkerHandle {
            shutdown_token,
            join_handle,
        }
    }

    fn listen_for_os_signals(&self) -> Option<JoinHandle<()>> {
        if !self.listen_os_shutdown_signals {
            return None;
        }
        let token = self.shutdown_token.clone();
        let worker_name = self.name.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!(%worker_name, "Shutdown signal received");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        }))
    }

    async fn release_locks(&self) -> Result<(), WorkerRuntimeError> {
        if !self.clear_locks_on_shutdown {
            return Ok(());
        }
        self.store
            .clear_locks(&self.name)
            .await
            .map(|_| ())
            .map_err(|source| {
                warn!(worker_name = %self.name, error = %source, "Could not release job locks");
                WorkerRuntimeError::ClearLocks {
                    worker_name: self.name.clone(),
                    source,
                }
            })
    }

    /// Reserves and runs up to `limit` jobs, stopping early when no job is
    /// eligible or shutdown was requested.
    pub async fn work_off(&self, limit: usize) -> Result<WorkOffStats, DelayedWorkerError> {
        let mut stats = WorkOffStats::default();
        let request = self.reserve_request();

        for _ in 0..limit {
            if self.is_shutting_down() {
                break;
            }
            let Some(job) = self.store.reserve(&request).await? else {
                trace!(worker_name = %self.name, "No job found");
                break;
            };

            if self.run_job(job).await?.is_success() {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }

        Ok(stats)
    }

    /// Runs a reserved job and writes its outcome back to the store.
    ///
    /// The returned error is a store failure; job failures are resolved into
    /// a [`RunOutcome`].
    #[tracing::instrument(
        "run_job",
        skip_all,
        fields(job_id = ?job.id(), job_name = %job.name(), worker_name = %self.name)
    )]
    pub async fn run_job(&self, mut job: Job) -> Result<RunOutcome, DelayedWorkerError> {
        let start = Instant::now();
        let result = job.invoke(&self.store, Some(&self.name)).await;
        let duration = start.elapsed();

        match result {
            Ok(()) => {
                job.destroy_it(&self.store).await?;
                info!(
                    job_id = ?job.id(),
                    handler_id = %job.handler_id(),
                    duration = duration.as_millis(),
                    "Completed job"
                );
                Ok(RunOutcome::Completed)
            }
            Err(e) if e.is_deserialization() => {
                error!(
                    job_id = ?job.id(),
                    handler_id = %job.handler_id(),
                    error = %e,
                    "Job cannot be built, failing without retry"
                );
                self.fail_job(&mut job, &e.to_string()).await
            }
            Err(e) => self.handle_failed_job(&mut job, &e.to_string()).await,
        }
    }

    /// Reschedules a failed job, or applies the failure policy once its
    /// attempts are exhausted.
    pub async fn handle_failed_job(
        &self,
        job: &mut Job,
        error: &str,
    ) -> Result<RunOutcome, DelayedWorkerError> {
        let next_attempts = job.attempts().saturating_add(1);
        let max_attempts = job.effective_max_attempts(self.max_attempts);

        if next_attempts < max_attempts {
            let run_at = job.reschedule_at(&self.store).await?;
            job.reschedule_it(&self.store, run_at, error).await?;
            warn!(
                job_id = ?job.id(),
                handler_id = %job.handler_id(),
                error,
                attempts = next_attempts,
                max_attempts,
                %run_at,
                "Failed job, rescheduled"
            );
            return Ok(RunOutcome::Rescheduled {
                attempts: next_attempts,
                run_at,
            });
        }

        error!(
            job_id = ?job.id(),
            handler_id = %job.handler_id(),
            error,
            attempts = job.attempts(),
            max_attempts,
            "Job max attempts reached"
        );
        self.fail_job(job, error).await
    }

    async fn fail_job(&self, job: &mut Job, error: &str) -> Result<RunOutcome, DelayedWorkerError> {
        if self.destroy_failed_jobs {
            job.destroy_it(&self.store).await?;
            Ok(RunOutcome::Destroyed)
        } else {
            job.fail_it(&self.store, error).await?;
            Ok(RunOutcome::Failed)
        }
    }
}

/// Handle on a worker spawned by [`Worker::start`].
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown_token: CancellationToken,
    join_handle: JoinHandle<Result<(), WorkerRuntimeError>>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Waits for the loop to end and its store handle to be released.
    pub async fn wait(self) -> Result<(), WorkerRuntimeError> {
        self.join_handle.await?
    }

    pub async fn shutdown_and_wait(self) -> Result<(), WorkerRuntimeError> {
        self.shutdown();
        self.wait().await
    }
}
