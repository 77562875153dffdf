//! Bounded polling with optional exponential backoff.
//!
//! Both long waits of the pipeline (proof job completion and transaction
//! confirmation) go through [`RetryPolicy::poll`], so neither can block
//! forever.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of polls, including the first one.
    pub max_attempts: u32,
    /// Delay after the first unsuccessful poll.
    pub initial_delay: Duration,
    /// Growth factor applied per attempt. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Cap on the delay between two polls.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(60, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// `retry_count` polls separated by `retry_delay`.
    pub fn fixed(retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: retry_count,
            initial_delay: retry_delay,
            multiplier: 1.0,
            max_delay: retry_delay,
        }
    }

    /// Patient policy for remote proof generation, which routinely takes minutes.
    pub fn proving() -> Self {
        Self {
            max_attempts: 120,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the given (0-indexed) unsuccessful attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64().max(self.initial_delay.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }

    /// Upper bound on the total time spent sleeping between polls.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    /// Calls `poll_once` until it yields `Some`, an error, or the attempt
    /// budget runs out. Exhaustion returns `Ok(None)`. The attempt number
    /// passed to `poll_once` starts at 1.
    pub async fn poll<T, E, F, Fut>(&self, mut poll_once: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = poll_once(attempt).await? {
                return Ok(Some(value));
            }
            if attempt < self.max_attempts {
                let delay = self.delay_for_attempt(attempt - 1);
                debug!(attempt, ?delay, "not ready, backing off");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }
}
