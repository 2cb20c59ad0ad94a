//! # Retry
//!
//! Pure policies deciding whether a failed message gets another attempt and how long to wait
//! before it. Delayers hold no state beyond their configuration and are shared across partitions.
use std::time;

pub trait RetryDelayer: Send + Sync {
    /// `attempt` is the number of handler invocations made so far for the message (1 after the
    /// first failure). Returns `None` once the retry budget is exhausted.
    fn delay_before_next_attempt(&self, attempt: u32) -> Option<time::Duration>;
}

/// Constant delay between attempts. The total budget bounds the number of handler
/// invocations to `floor(retry_budget / delay)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleRetryDelayer {
    delay: time::Duration,
    max_attempts: u32,
}

impl SimpleRetryDelayer {
    pub fn new(delay: time::Duration, retry_budget: time::Duration) -> Self {
        let max_attempts = if delay.is_zero() {
            0
        } else {
            u32::try_from(retry_budget.as_nanos() / delay.as_nanos()).unwrap_or(u32::MAX)
        };

        Self {
            delay,
            max_attempts,
        }
    }

    pub fn from_millis(delay_ms: u64, retry_budget_ms: u64) -> Self {
        Self::new(
            time::Duration::from_millis(delay_ms),
            time::Duration::from_millis(retry_budget_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl RetryDelayer for SimpleRetryDelayer {
    fn delay_before_next_attempt(&self, attempt: u32) -> Option<time::Duration> {
        if attempt < self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

/// Exponential backoff bounded by the sum of all delays spent on one message.
///
/// The n-th retry waits `initial_interval * coefficient^(n-1)`, capped at the optional
/// maximum interval. A retry is granted only while the delays so far plus the next one fit
/// the budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffRetryDelayer {
    initial_interval: time::Duration,
    coefficient: u32,
    maximum_interval: Option<time::Duration>,
    retry_budget: time::Duration,
}

impl BackoffRetryDelayer {
    pub const DEFAULT_RETRY_BUDGET: time::Duration = time::Duration::from_secs(60);

    pub fn new(initial_interval: time::Duration, coefficient: u32) -> Self {
        Self {
            initial_interval,
            coefficient,
            maximum_interval: None,
            retry_budget: Self::DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_maximum_interval(self, maximum_interval: time::Duration) -> Self {
        Self {
            maximum_interval: Some(maximum_interval),
            ..self
        }
    }

    pub fn with_retry_budget(self, retry_budget: time::Duration) -> Self {
        Self {
            retry_budget,
            ..self
        }
    }

    /// Delay before the retry that follows `attempt` failed invocations.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let interval = self
            .coefficient
            .checked_pow(exponent)
            .and_then(|factor| self.initial_interval.checked_mul(factor))
            .unwrap_or(time::Duration::MAX);

        self.maximum_interval.map_or(interval, |maximum| interval.min(maximum))
    }
}

impl RetryDelayer for BackoffRetryDelayer {
    fn delay_before_next_attempt(&self, attempt: u32) -> Option<time::Duration> {
        if attempt == 0 {
            return None;
        }

        let next = self.retry_interval(attempt);
        let total = (1..attempt)
            .map(|past| self.retry_interval(past))
            .fold(next, time::Duration::saturating_add);

        (total <= self.retry_budget).then_some(next)
    }
}

impl Default for BackoffRetryDelayer {
    fn default() -> Self {
        Self::new(time::Duration::from_secs(1), 2)
    }
}
