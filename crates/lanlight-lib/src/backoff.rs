//! Retry-with-timeout around a single fallible device operation.
//!
//! Each attempt runs under its own deadline. After a transient failure the
//! caller's thread sleeps for a fixed delay and the deadline doubles, capped
//! at `max_deadline`. A failure of an attempt that already ran at the cap
//! is reported as [`LightError::DeadlineExceeded`], which callers treat as
//! fatal for the session.

use std::time::Duration;

use crate::device::{LightError, Result};

/// Smallest per-attempt deadline; shorter initial deadlines are raised to it.
pub const MIN_DEADLINE: Duration = Duration::from_millis(1);

/// Configuration for retry pacing.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Deadline cap. An attempt that fails at this deadline is fatal.
    pub max_deadline: Duration,
    /// Fixed sleep between a failed attempt and the next one.
    pub retry_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_deadline: Duration::from_secs(4),
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Result of a successful [`Backoff::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// First attempt succeeded.
    Succeeded(T),
    /// Succeeded after `failures` failed attempts.
    Recovered { value: T, failures: u32 },
}

impl<T> Outcome<T> {
    pub fn into_value(self) -> T {
        match self {
            Outcome::Succeeded(value) | Outcome::Recovered { value, .. } => value,
        }
    }

    /// Number of failed attempts before the one that succeeded.
    pub fn failures(&self) -> u32 {
        match self {
            Outcome::Succeeded(_) => 0,
            Outcome::Recovered { failures, .. } => *failures,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, Outcome::Recovered { .. })
    }
}

/// The deadline that follows `current` after a failure.
pub fn next_deadline(current: Duration, max: Duration) -> Duration {
    current.checked_mul(2).unwrap_or(Duration::MAX).min(max)
}

/// Blocking retry executor.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Run `op` until it succeeds or the deadline budget is spent.
    ///
    /// `op` receives the deadline for the current attempt and must not block
    /// longer than that. Deadlines go `initial, 2×initial, 4×initial, …`
    /// up to `max_deadline`. Errors that are not transient are returned
    /// immediately without retrying.
    pub fn run<T>(
        &self,
        initial: Duration,
        mut op: impl FnMut(Duration) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let max = self.config.max_deadline.max(MIN_DEADLINE);
        let mut deadline = initial.clamp(MIN_DEADLINE, max);
        let mut failures: u32 = 0;

        loop {
            match op(deadline) {
                Ok(value) if failures == 0 => return Ok(Outcome::Succeeded(value)),
                Ok(value) => return Ok(Outcome::Recovered { value, failures }),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if deadline >= max {
                        return Err(LightError::DeadlineExceeded {
                            deadline,
                            last: Box::new(e),
                        });
                    }
                    let next = next_deadline(deadline, max);
                    log::debug!(
                        "attempt {failures} failed at {deadline:?}: {e} (retrying with {next:?})"
                    );
                    std::thread::sleep(self.config.retry_delay);
                    deadline = next;
                }
            }
        }
    }
}
