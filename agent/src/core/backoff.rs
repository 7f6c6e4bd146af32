//! Exponential backoff schedule for retried model calls.

use std::time::Duration;

/// Deterministic delay schedule: `base_delay * multiplier^attempt`, capped.
///
/// With `multiplier >= 1.0` the schedule is non-decreasing across attempts,
/// which callers rely on to respect provider rate limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySchedule {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetrySchedule {
    /// Delay to wait after a failed attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}
