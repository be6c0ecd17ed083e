pub(crate) mod add_job;
pub(crate) mod args;
pub(crate) mod complete_job;
pub(crate) mod get_job;
pub(crate) mod job_query_helpers;
pub(crate) mod report;
pub(crate) mod unlock_jobs;
pub(crate) mod update_job;
