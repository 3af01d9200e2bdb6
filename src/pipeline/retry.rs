//! Backoff policy for pipeline retries.

use std::time::Duration;

/// Default maximum attempts per item (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before a retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(60);

/// Bounded fixed-or-exponential backoff, attached per pipeline.
///
/// `attempt` counts failures so far, so the first retry uses attempt 1.
/// With `exponential` set, delays double per attempt and are capped at ten
/// minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed per item, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Double the delay on each subsequent attempt.
    pub exponential: bool,
}

/// Ceiling for exponential delays.
const MAX_DELAY: Duration = Duration::from_secs(600);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the retry following failure number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}
