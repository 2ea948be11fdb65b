use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff with additive jitter.
///
/// `max_attempts` counts every try, including the first one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy for chunk uploads: eight retries, 2s doubling, capped at 30s.
    pub fn upload() -> Self {
        Self {
            max_attempts: 9,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }

    /// Policy for downloads: five attempts, 1s doubling, capped at 60s.
    pub fn download() -> Self {
        Self::default()
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Returns `true` if another attempt may follow `attempts_made` tries.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `min(max_delay, base_delay * 2^(retry-1) + U[0, jitter))`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let base = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay);
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.jitter.as_nanos().min(u64::MAX as u128) as u64;
            Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
        };
        base.saturating_add(jitter).min(self.max_delay)
    }
}

/// An optional point in time after which no new attempt may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline `timeout` from now, or none.
    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Shortens `wait` so that it does not run past the deadline.
    pub fn clamp(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }

    /// Sleeps for `wait` (clamped). Returns `false` if the deadline has passed
    /// by the time the sleep ends.
    pub async fn sleep(&self, wait: Duration) -> bool {
        tokio::time::sleep(self.clamp(wait)).await;
        !self.is_expired()
    }
}
