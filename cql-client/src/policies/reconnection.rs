//! Backoff schedules for reconnecting to down hosts.

use std::collections::BTreeMap;
use std::time::Duration;

use cql_core::{DriverError, Result};

use super::PolicyOptions;

/// A lazy, possibly infinite sequence of delays for one reconnection
/// series. Each series owns its state.
pub type Schedule = Box<dyn Iterator<Item = Duration> + Send>;

/// Produces independent backoff schedules.
pub trait ReconnectionPolicy: Send + Sync + std::fmt::Debug {
    /// Starts a new schedule.
    fn new_schedule(&self) -> Schedule;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// Waits the same delay before every attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl ConstantReconnectionPolicy {
    /// Creates a policy with a fixed delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_schedule(&self) -> Schedule {
        Box::new(std::iter::repeat(self.delay))
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([("delay", self.delay.as_millis().to_string())])
    }
}

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);

/// Doubles the delay from `base_delay` up to `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    start_with_no_delay: bool,
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            start_with_no_delay: false,
        }
    }
}

impl ExponentialReconnectionPolicy {
    /// Creates a policy; the first delay is zero when `start_with_no_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Construction`] if `base_delay` is zero or
    /// exceeds `max_delay`.
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
        start_with_no_delay: bool,
    ) -> Result<Self> {
        if base_delay.is_zero() {
            return Err(DriverError::Construction(
                "base_delay must be greater than zero".to_string(),
            ));
        }
        if base_delay > max_delay {
            return Err(DriverError::Construction(
                "base_delay must not exceed max_delay".to_string(),
            ));
        }
        Ok(Self {
            base_delay,
            max_delay,
            start_with_no_delay,
        })
    }

    /// Returns the base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the maximum delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_schedule(&self) -> Schedule {
        Box::new(ExponentialSchedule {
            next: self.base_delay,
            max_delay: self.max_delay,
            pending_zero: self.start_with_no_delay,
        })
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([
            ("baseDelay", self.base_delay.as_millis().to_string()),
            ("maxDelay", self.max_delay.as_millis().to_string()),
            ("startWithNoDelay", self.start_with_no_delay.to_string()),
        ])
    }
}

struct ExponentialSchedule {
    next: Duration,
    max_delay: Duration,
    pending_zero: bool,
}

impl Iterator for ExponentialSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.pending_zero {
            self.pending_zero = false;
            return Some(Duration::ZERO);
        }
        let current = self.next.min(self.max_delay);
        self.next = current
            .checked_mul(2)
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        Some(current)
    }
}
