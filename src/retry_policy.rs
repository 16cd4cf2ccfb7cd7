//! Retry policy shared by the download queue and the post scheduler.
//!
//! Implements capped exponential backoff. The policy is a pure function of
//! the attempt count, so the same failure history always yields the same
//! schedule.

use crate::config::RetrySettings;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed before permanent failure.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff_secs: u64,
    /// Ceiling for exponential growth.
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Whether a job that has failed `attempts` times gets another try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Seconds to wait before the next attempt, given `attempts` failures so
    /// far: `initial * multiplier^(attempts - 1)`, capped at `max_backoff_secs`.
    /// Zero failures means no wait.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exponent = (attempts - 1).min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        if !backoff.is_finite() || backoff >= self.max_backoff_secs as f64 {
            self.max_backoff_secs
        } else {
            backoff as u64
        }
    }

    /// Unix timestamp of the next attempt.
    pub fn next_attempt_at(&self, now: i64, attempts: u32) -> i64 {
        now.saturating_add(self.backoff_secs(attempts) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
        }
    }
}
