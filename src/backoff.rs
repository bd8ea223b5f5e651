//! Reconnect delay policy

use crate::config::RealtimeConfig;
use std::time::Duration;

const DEFAULT_FACTOR: f64 = 2.0;

/// Exponential backoff with a cap and an optional retry budget.
///
/// Delays never decrease between resets. The budget counts consecutive
/// failures; `reset()` is called once a connection is established.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            DEFAULT_FACTOR
        };
        let max = max.max(base);
        Self {
            base,
            max,
            factor,
            current: base,
            attempts: 0,
            max_attempts: None,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            config.reconnect_delay,
            config.max_reconnect_delay,
            config.backoff_factor,
        )
        .with_max_attempts(config.max_reconnect_attempts)
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        self.attempts += 1;
        let delay = self.current;
        let next = Duration::from_nanos((self.current.as_nanos() as f64 * self.factor) as u64);
        self.current = next.min(self.max).max(self.current);
        Some(delay)
    }

    /// Delay the next call to `next_delay` would return, without consuming it
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }

    /// Consecutive attempts consumed since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_attempts, Some(max) if self.attempts >= max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), DEFAULT_FACTOR)
    }
}
