//! Reconnection backoff.
//!
//! ```text
//! delay(n) = min(max_delay, base * 2^(n-1) + jitter),  jitter ∈ [0, max_jitter)
//! ```
//!
//! Attempts are unbounded; the session keeps retrying until the
//! application disconnects.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first retry, excluding jitter.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Exclusive upper bound on random jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1_000);

// ============================================================================
// BackoffConfig
// ============================================================================

/// Tunables for [`ReconnectPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay for attempt 1, doubled for each attempt after.
    pub base: Duration,
    /// Cap applied after jitter.
    pub max_delay: Duration,
    /// Jitter is drawn uniformly from `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl BackoffConfig {
    /// Delay for `attempt` before jitter, capped at `max_delay`.
    ///
    /// `attempt` is 1-based; 0 is treated as 1.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.uncapped(attempt).min(self.max_delay)
    }

    /// Full delay for `attempt` with an explicit jitter value.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        self.uncapped(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    fn uncapped(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Draws a jitter value in `[0, max_jitter)`.
    fn sample_jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..bound))
    }
}

// ============================================================================
// ReconnectState
// ============================================================================

/// Snapshot of reconnection progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Retries scheduled since the last successful open.
    pub attempts: u32,
    /// `true` from the close that scheduled a retry until the next open.
    pub is_reconnecting: bool,
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Counts attempts and computes the delay before each one.
#[derive(Debug, Clone, Default)]
pub struct ReconnectPolicy {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Creates a policy with no attempts recorded.
    #[inline]
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Records a new attempt and returns how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let jitter = self.config.sample_jitter();
        self.config.delay_with_jitter(self.attempts, jitter)
    }

    /// Attempts scheduled since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Clears the attempt counter after a successful open.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Backoff settings in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

// ============================================================================
// Tests
// ============================================================================
