use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    #[serde(with = "crate::config::human_duration")]
    pub base_delay: Duration,
    #[serde(with = "crate::config::human_duration")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
        }
    }
}

/// Bounded retry with exponential backoff for transient source errors.
#[derive(Debug, Clone)]
pub struct RetryRunner {
    policy: RetryPolicy,
}

impl RetryRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn should_retry(err: &SourceError) -> bool {
        err.is_transient()
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let mut d = self.policy.base_delay * (1u32 << (attempt.min(3) as u32));
        if d > self.policy.max_delay {
            d = self.policy.max_delay;
        }
        // deterministic jitter, 0..=50ms
        let jitter_ms = (attempt as u64 * 17) % 51;
        d + Duration::from_millis(jitter_ms).min(self.policy.base_delay)
    }

    pub async fn run<F, Fut, T>(&self, what: &str, mut f: F) -> Result<T, SourceError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !Self::should_retry(&e) || attempt + 1 >= attempts {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    debug!(what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
