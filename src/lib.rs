//! A database-backed delayed job queue.
//!
//! Jobs are rows in one SQL table. Producers [`enqueue`](JobStore::enqueue)
//! JSON payloads tagged with a handler `type`; [`Worker`]s reserve due rows
//! under a lock, build the registered handler and run it, deleting the row on
//! success and rescheduling it with a backoff on failure. Postgres, SQLite and
//! MySQL are supported through sqlx's `Any` driver.
//!
//! ```no_run
//! use delayed_worker::{handler_fn, require_str, JobSpec, JobStore, Registry, Worker};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.register("send_email", |_ctx, attributes| {
//!     let to = require_str(attributes, "to")?.to_string();
//!     Ok(handler_fn(move || {
//!         let to = to.clone();
//!         async move {
//!             println!("Sending email to {to}");
//!             Ok::<(), String>(())
//!         }
//!     }))
//! });
//!
//! let store = JobStore::options()
//!     .database_url("sqlite://jobs.db?mode=rwc")
//!     .registry(registry)
//!     .init()
//!     .await?;
//!
//! store
//!     .enqueue(JobSpec::default(), json!({"type": "send_email", "to": "ops@example.com"}))
//!     .await?;
//!
//! Worker::options().store(store).init()?.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod columns;
pub mod config;
pub mod context;
pub mod errors;
pub mod filter;
pub mod handler_id;
pub mod job;
pub mod job_spec;
pub mod job_update;
pub mod runner;
mod sql;
pub mod status;
pub mod store;
pub mod store_options;
mod utils;

pub use crate::builder::{WorkerBuildError, WorkerOptions};
pub use crate::columns::{ColumnKind, JobColumn, SqlValue, UnknownColumn};
pub use crate::config::WorkerConfig;
pub use crate::context::{HandlerContext, Registry};
pub use crate::errors::{DelayedWorkerError, Result};
pub use crate::filter::{Aggregate, CompareOp, Having, JobFilter, OrderBy};
pub use crate::handler_id::HandlerIdSequence;
pub use crate::job::{DbJob, Job, JobError};
pub use crate::job_spec::{EnqueueRequest, JobSpec, JobSpecBuilder};
pub use crate::job_update::{JobUpdate, SET_MARKER};
pub use crate::runner::{RunOutcome, WorkOffStats, Worker, WorkerHandle, WorkerRuntimeError};
pub use crate::status::{StatusBoard, StatusReport};
pub use crate::store::{JobStore, ReserveRequest, TimeSource, UNBOUNDED_PRIORITY};
pub use crate::store_options::{StoreBuildError, StoreOptions};
pub use crate::utils::{parse_duration, ParseDurationError};

pub use delayed_worker_dialect::{ClaimStrategy, Dialect};
pub use delayed_worker_handler::{
    handler_fn, optional_str, require_i64, require_str, Attributes, BoxedHandler,
    BuildHandlerError, Handler, PerformFuture,
};
