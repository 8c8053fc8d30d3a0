// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconnect backoff with jitter.
//!
//! The first reconnect after a healthy connection is immediate. After that
//! each failure grows the delay by `factor`, capped at `max_delay`:
//!
//! ```text
//! success ─► 0 ─► 1s ─► 1.3s ─► 1.69s ─► ... ─► 30s ─► 30s
//! ```
//!
//! Jitter scales each delay into `[(1 - j) * d, d]`.
//!
//! # Example
//!
//! ```
//! use realtime_sync::resilience::{RetryConfig, RetryHelper};
//! use std::time::Duration;
//!
//! let mut retry = RetryHelper::new(RetryConfig::session().without_jitter());
//! assert_eq!(retry.next_delay(), Duration::ZERO);
//! assert_eq!(retry.next_delay(), Duration::from_secs(1));
//! assert_eq!(retry.next_delay(), Duration::from_millis(1300));
//!
//! retry.signal_success();
//! assert_eq!(retry.next_delay(), Duration::ZERO);
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Backoff parameters. [`RetryConfig::session()`] is the reconnect schedule
/// realtime servers expect.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// 0.0 disables jitter, 1.0 allows delays down to zero.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::session()
    }
}

impl RetryConfig {
    /// 1s, growing by 1.3x up to 30s, with 70% jitter.
    #[must_use]
    pub fn session() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            factor: 1.3,
            jitter_factor: 0.7,
        }
    }

    /// Same schedule with jitter disabled, for deterministic delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Backoff state for one session.
///
/// The helper only computes delays. Scheduling is left to the caller, which
/// hands back the timer id so a pending retry can be cancelled.
#[derive(Debug)]
pub struct RetryHelper {
    config: RetryConfig,
    current_delay: Duration,
    last_was_success: bool,
    scheduled: Option<u64>,
}

impl RetryHelper {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            current_delay: Duration::ZERO,
            last_was_success: true,
            scheduled: None,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Undelayed base of the next failure delay.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Delay before the next attempt. Every call after the first counts as
    /// a failure until [`RetryHelper::signal_success`] is called.
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.last_was_success {
            Duration::ZERO
        } else {
            self.current_delay = if self.current_delay.is_zero() {
                self.config.initial_delay
            } else {
                scale_millis(self.current_delay, self.config.factor).min(self.config.max_delay)
            };
            let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
            if jitter > 0.0 {
                let random: f64 = rand::rng().random();
                scale_millis(self.current_delay, 1.0 - jitter * random)
            } else {
                self.current_delay
            }
        };
        self.last_was_success = false;
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling retry");
        delay
    }

    /// The last connection was healthy, so the next retry is immediate.
    pub fn signal_success(&mut self) {
        self.last_was_success = true;
        self.current_delay = Duration::ZERO;
    }

    /// Jump straight to the longest delay.
    pub fn set_max_delay(&mut self) {
        self.current_delay = self.config.max_delay;
    }

    /// Remember the timer carrying the pending retry.
    pub fn set_scheduled(&mut self, timer_id: u64) {
        self.scheduled = Some(timer_id);
    }

    /// Timer carrying the pending retry, if any.
    pub fn scheduled(&self) -> Option<u64> {
        self.scheduled
    }

    /// Forget the pending retry, returning its timer id.
    pub fn take_scheduled(&mut self) -> Option<u64> {
        self.scheduled.take()
    }

    /// Drop any pending retry and reset the backoff. Returns the timer to cancel.
    pub fn cancel(&mut self) -> Option<u64> {
        self.current_delay = Duration::ZERO;
        self.scheduled.take()
    }
}

/// Scale a delay, rounded to whole milliseconds.
fn scale_millis(delay: Duration, factor: f64) -> Duration {
    Duration::from_millis((delay.as_millis() as f64 * factor).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> RetryHelper {
        RetryHelper::new(RetryConfig::session().without_jitter())
    }

    #[test]
    fn test_session_preset() {
        let config = RetryConfig::session();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.factor, 1.3);
        assert_eq!(config.jitter_factor, 0.7);
    }

    #[test]
    fn test_first_attempt_is_immediate() {
        let mut retry = helper();
        assert_eq!(retry.next_delay(), Duration::ZERO);
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
        assert_eq!(retry.next_delay(), Duration::from_millis(1300));
    }

    #[test]
    fn test_capped_at_max() {
        let mut retry = helper();
        for _ in 0..50 {
            retry.next_delay();
        }
        assert_eq!(retry.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_set_max_delay() {
        let mut retry = helper();
        retry.next_delay();
        retry.set_max_delay();
        assert_eq!(retry.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_signal_success_resets() {
        let mut retry = helper();
        retry.next_delay();
        retry.next_delay();
        retry.signal_success();
        assert_eq!(retry.current_delay(), Duration::ZERO);
        assert_eq!(retry.next_delay(), Duration::ZERO);
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut retry = RetryHelper::new(RetryConfig::session());
        retry.next_delay();
        for _ in 0..100 {
            let delay = retry.next_delay();
            let base = retry.current_delay();
            assert!(delay <= base, "{delay:?} > {base:?}");
            assert!(delay >= base.mul_f64(0.3).saturating_sub(Duration::from_millis(1)));
            assert_eq!(delay.subsec_nanos() % 1_000_000, 0);
        }
    }

    #[test]
    fn test_cancel_returns_timer() {
        let mut retry = helper();
        retry.next_delay();
        retry.next_delay();
        retry.set_scheduled(7);
        assert_eq!(retry.cancel(), Some(7));
        assert_eq!(retry.cancel(), None);
        assert_eq!(retry.current_delay(), Duration::ZERO);
    }
}
