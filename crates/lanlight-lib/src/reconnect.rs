//! Rebuild pacing for the light group.
//!
//! When discovery finds nothing, or a session ends on a fatal error, the
//! supervisor rebuilds the whole group. Rebuilds back off exponentially so a
//! powered-off light or a dead network is not flooded with broadcasts.

use std::time::{Duration, Instant};

/// Configuration for rebuild backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed rebuild.
    pub initial_delay: Duration,
    /// Maximum delay between rebuilds.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

/// Rebuild state machine with exponential backoff.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    current_delay: Duration,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReconnectConfig::default())
    }

    /// `true` if no attempt has failed yet, or the delay has elapsed since
    /// the last failure.
    pub fn should_attempt(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Time left before the next rebuild is due.
    pub fn remaining(&self) -> Duration {
        match self.last_attempt {
            None => Duration::ZERO,
            Some(last) => self.current_delay.saturating_sub(last.elapsed()),
        }
    }

    /// Record a failed rebuild. The delay before the next one is the
    /// current delay; the one after that is advanced.
    pub fn record_failure(&mut self) {
        if self.last_attempt.is_some() {
            let next = self.current_delay.as_secs_f64() * self.config.multiplier;
            self.current_delay = Duration::from_secs_f64(next).min(self.config.max_delay);
        }
        self.consecutive_failures += 1;
        self.last_attempt = Some(Instant::now());
    }

    /// Record a successful rebuild and reset the backoff.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.config.initial_delay;
        self.last_attempt = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay in effect after the most recent failure.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}
