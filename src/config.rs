use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::builder::{
    WorkerOptions, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RUN_TIME,
    DEFAULT_SLEEP_DELAY,
};
use crate::store::UNBOUNDED_PRIORITY;
use crate::utils::parse_duration;

/// Worker settings as read from a configuration file or environment.
///
/// Durations accept `"5s"`-style strings or integer seconds, `queues` a
/// comma separated string or a list.
///
/// ```
/// use delayed_worker::WorkerConfig;
///
/// let config: WorkerConfig = serde_json::from_str(
///     r#"{"max_run_time": "1h", "sleep_delay": 2, "queues": "mailers, reports"}"#,
/// ).unwrap();
/// assert_eq!(config.queues, vec!["mailers", "reports"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: Option<String>,
    pub min_priority: i64,
    pub max_priority: i64,
    pub max_attempts: i64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_run_time: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub sleep_delay: Duration,
    #[serde(deserialize_with = "deserialize_queues")]
    pub queues: Vec<String>,
    pub exit_on_complete: bool,
    pub destroy_failed_jobs: bool,
    pub batch_size: usize,
    pub clear_locks_on_shutdown: bool,
    pub listen_os_shutdown_signals: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: None,
            min_priority: UNBOUNDED_PRIORITY,
            max_priority: UNBOUNDED_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_run_time: DEFAULT_MAX_RUN_TIME,
            sleep_delay: DEFAULT_SLEEP_DELAY,
            queues: Vec::new(),
            exit_on_complete: false,
            destroy_failed_jobs: false,
            batch_size: DEFAULT_BATCH_SIZE,
            clear_locks_on_shutdown: true,
            listen_os_shutdown_signals: true,
        }
    }
}

impl WorkerConfig {
    /// Worker options carrying this configuration; the store is still to be set.
    pub fn into_options(self) -> WorkerOptions {
        let options = WorkerOptions::default()
            .min_priority(self.min_priority)
            .max_priority(self.max_priority)
            .max_attempts(self.max_attempts)
            .max_run_time(self.max_run_time)
            .sleep_delay(self.sleep_delay)
            .queues(self.queues)
            .exit_on_complete(self.exit_on_complete)
            .destroy_failed_jobs(self.destroy_failed_jobs)
            .batch_size(self.batch_size)
            .clear_locks_on_shutdown(self.clear_locks_on_shutdown)
            .listen_os_shutdown_signals(self.listen_os_shutdown_signals);
        match self.name {
            Some(name) => options.name(&name),
            None => options,
        }
    }
}

impl From<WorkerConfig> for WorkerOptions {
    fn from(config: WorkerConfig) -> Self {
        config.into_options()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationInput {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match DurationInput::deserialize(deserializer)? {
        DurationInput::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        DurationInput::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueuesInput {
    List(Vec<String>),
    Text(String),
}

fn deserialize_queues<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let queues = match QueuesInput::deserialize(deserializer)? {
        QueuesInput::List(queues) => queues,
        QueuesInput::Text(text) => text.split(',').map(str::to_string).collect(),
    };
    Ok(queues
        .into_iter()
        .map(|queue| queue.trim().to_string())
        .filter(|queue| !queue.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").expect("Empty config should parse");
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.max_attempts, 25);
        assert_eq!(config.max_run_time, Duration::from_secs(4 * 3600));
        assert_eq!(config.sleep_delay, Duration::from_secs(5));
        assert_eq!(config.min_priority, -1);
        assert_eq!(config.max_priority, -1);
        assert!(config.queues.is_empty());
        assert!(!config.exit_on_complete);
        assert!(!config.destroy_failed_jobs);
    }

    #[test]
    fn test_durations_and_queues() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{
                "name": "reports-1",
                "min_priority": 0,
                "max_priority": 10,
                "max_attempts": 3,
                "max_run_time": "1h30m",
                "sleep_delay": 2,
                "queues": "mailers, ,reports",
                "exit_on_complete": true,
                "destroy_failed_jobs": true
            }"#,
        )
        .expect("Config should parse");

        assert_eq!(config.name.as_deref(), Some("reports-1"));
        assert_eq!(config.max_run_time, Duration::from_secs(5400));
        assert_eq!(config.sleep_delay, Duration::from_secs(2));
        assert_eq!(config.queues, vec!["mailers", "reports"]);
        assert!(config.exit_on_complete);
        assert!(config.destroy_failed_jobs);
    }

    #[test]
    fn test_invalid_duration() {
        let result = serde_json::from_str::<WorkerConfig>(r#"{"sleep_delay": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_queue_list() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"queues": ["a", " b "]}"#).expect("Config should parse");
        assert_eq!(config.queues, vec!["a", "b"]);
    }
}
