//! Periodic liveness ping.
//!
//! The monitor only schedules beats and counts unanswered ones. Whether
//! unanswered beats close the socket is the session's decision.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

// ============================================================================
// Constants
// ============================================================================

/// Default beat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Heartbeat
// ============================================================================

/// Fixed-period heartbeat timer.
#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    interval: Option<Interval>,
    unanswered: u32,
}

impl Heartbeat {
    /// Creates a stopped heartbeat.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
            unanswered: 0,
        }
    }

    /// Starts beating; the first beat is one period from now.
    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.unanswered = 0;
    }

    /// Stops beating. Safe to call when already stopped.
    pub fn stop(&mut self) {
        self.interval = None;
        self.unanswered = 0;
    }

    /// `true` while started.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves at the next beat. Never resolves while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }

    /// Records that a heartbeat went out.
    #[inline]
    pub fn record_beat(&mut self) {
        self.unanswered = self.unanswered.saturating_add(1);
    }

    /// Records a `pong`.
    #[inline]
    pub fn acknowledge(&mut self) {
        self.unanswered = 0;
    }

    /// Beats sent since the last `pong`.
    #[inline]
    #[must_use]
    pub const fn unanswered(&self) -> u32 {
        self.unanswered
    }
}

// ============================================================================
// Tests
// ============================================================================
