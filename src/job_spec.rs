use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for enqueueing a job.
///
/// Every field is optional: an empty spec enqueues a job with priority 0, due
/// now, in no queue, using the worker's default `max_attempts`.
///
/// ```
/// use delayed_worker::JobSpec;
///
/// let spec = JobSpec::builder()
///     .queue("mailers")
///     .priority(10)
///     .build();
/// ```
#[derive(Getters, Debug, Clone, PartialEq, Eq, Default, Builder, Serialize, Deserialize)]
#[getset(get = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
#[serde(default)]
pub struct JobSpec {
    /// Scheduling order, lower values run first. Defaults to 0.
    pub priority: Option<i64>,

    /// Recurrence metadata, stored as is.
    pub repeat_count: Option<i64>,

    /// Recurrence metadata, stored as is.
    #[builder(setter(into))]
    pub repeat_interval: Option<String>,

    /// Per-job override of the worker's `max_attempts`. Values `<= 0` mean
    /// "use the worker default".
    pub max_attempts: Option<i64>,

    /// Partition label, matched against the worker's queue set.
    #[builder(setter(into))]
    pub queue: Option<String>,

    /// Earliest time the job may run. Defaults to the store's current time.
    #[builder(setter(into))]
    pub run_at: Option<DateTime<Utc>>,

    /// Idempotency key. Enqueueing a job with the key of an existing row
    /// replaces that row. Generated when absent.
    #[builder(setter(into))]
    pub handler_id: Option<String>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        // Every field has a default, the internal build cannot fail
        self.build_internal().unwrap_or_default()
    }
}

impl From<Option<JobSpec>> for JobSpec {
    fn from(spec: Option<JobSpec>) -> Self {
        spec.unwrap_or_default()
    }
}

/// The JSON enqueue shape: the spec fields flattened next to the `handler`
/// payload.
///
/// ```json
/// {"priority": 5, "queue": "mailers", "handler": {"type": "mail", "to": "ops@example.com"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub spec: JobSpec,
    pub handler: Value,
}

impl EnqueueRequest {
    pub fn new(spec: JobSpec, handler: Value) -> Self {
        EnqueueRequest { spec, handler }
    }
}
