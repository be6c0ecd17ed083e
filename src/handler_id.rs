use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::RngCore;

/// Generates unique `handler_id` idempotency keys.
///
/// Keys are `<prefix>-<counter>`: the prefix mixes the creation time with
/// random bytes so two processes never share it, and the counter is
/// monotonic within the process.
#[derive(Debug)]
pub struct HandlerIdSequence {
    prefix: String,
    counter: AtomicU64,
}

impl HandlerIdSequence {
    pub fn new() -> Self {
        let mut random_bytes = [0u8; 4];
        rand::rng().fill_bytes(&mut random_bytes);
        let prefix = format!(
            "{:x}{}",
            Utc::now().timestamp_micros(),
            hex::encode(random_bytes)
        );
        Self::with_prefix(prefix)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        HandlerIdSequence {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

impl Default for HandlerIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
