//! Retry policies for failed task attempts.

use std::fmt::Debug;
use std::time::Duration;

/// Decides what happens after a task attempt fails.
pub trait RetryPolicy: Debug + Send + Sync {
    /// `failures` is the number of failed attempts so far for `task`, at least 1.
    ///
    /// Returns how long to wait before the next attempt, or `None` to give up.
    fn next_delay(&self, task: usize, failures: u32) -> Option<Duration>;
}

/// Retry forever, immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl RetryPolicy for Unbounded {
    fn next_delay(&self, _task: usize, _failures: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Geometric backoff with an optional attempt limit.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub initial: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    pub multiplier: f64,

    /// Give up once a task has failed this many times.
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ExponentialBackoff {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, _task: usize, failures: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| failures >= max) {
            return None;
        }

        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());

        Some(Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay))
    }
}
