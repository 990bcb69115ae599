//! Reconnection schedules attached to hosts.
//!
//! When a host is marked down it asks its schedule for the delay after which a
//! reconnection should be attempted. Acting on that time is left to whoever
//! watches [`Host::next_reconnection_attempt`](crate::cluster::host::Host::next_reconnection_attempt).

use std::fmt::Debug;
use std::time::Duration;

/// Sequence of delays between consecutive reconnection attempts to one host.
pub type ReconnectionSchedule = Box<dyn Iterator<Item = Duration> + Send + Sync>;

/// Creates reconnection schedules, one per host.
pub trait ReconnectionPolicy: Debug + Send + Sync {
    /// Returns a fresh schedule, starting from the first delay.
    fn new_schedule(&self) -> ReconnectionSchedule;
}

/// Waits the same delay before every attempt.
#[derive(Debug, Clone)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl ConstantReconnectionPolicy {
    /// Creates a policy that always waits `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_schedule(&self) -> ReconnectionSchedule {
        Box::new(std::iter::repeat(self.delay))
    }
}

const DELAY_MULTIPLIER: u32 = 2;

/// Doubles the delay after every attempt, up to a maximum.
#[derive(Debug, Clone)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialReconnectionPolicy {
    /// Creates a policy starting at `base_delay` and never waiting longer than `max_delay`.
    ///
    /// `base_delay` larger than `max_delay` is clamped down to it.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay: std::cmp::min(base_delay, max_delay),
            max_delay,
        }
    }
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10 * 60))
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_schedule(&self) -> ReconnectionSchedule {
        let max_delay = self.max_delay;
        Box::new(std::iter::successors(Some(self.base_delay), move |delay| {
            Some(
                delay
                    .checked_mul(DELAY_MULTIPLIER)
                    .map_or(max_delay, |next| std::cmp::min(next, max_delay)),
            )
        }))
    }
}
