//! Client-side write timestamps.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::PolicyOptions;

/// Produces write timestamps in microseconds since the Unix epoch.
pub trait TimestampGenerator: Send + Sync + std::fmt::Debug {
    /// Next timestamp; `None` lets the server assign one.
    fn next(&self) -> Option<i64>;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// Source of the current time in microseconds.
pub type Clock = fn() -> i64;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_secs(1);
const DEFAULT_MIN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Strictly increasing timestamps, even across threads and clock drift.
///
/// When the clock does not move past the last returned value, the
/// generator returns the last value plus one microsecond. Once the
/// returned values run ahead of the clock by more than the warning
/// threshold a warning is logged, at most once per log interval.
#[derive(Debug)]
pub struct MonotonicTimestampGenerator {
    last: AtomicI64,
    last_warning: AtomicI64,
    warning_threshold_micros: i64,
    min_log_interval_micros: i64,
    clock: Clock,
}

impl Default for MonotonicTimestampGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_THRESHOLD, DEFAULT_MIN_LOG_INTERVAL)
    }
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl MonotonicTimestampGenerator {
    /// Creates a generator reading the system clock.
    pub fn new(warning_threshold: Duration, min_log_interval: Duration) -> Self {
        Self {
            last: AtomicI64::new(i64::MIN),
            last_warning: AtomicI64::new(i64::MIN),
            warning_threshold_micros: micros(warning_threshold),
            min_log_interval_micros: micros(min_log_interval),
            clock: system_clock,
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn warn_drift(&self, now: i64, timestamp: i64) {
        let drift = timestamp.saturating_sub(now);
        if drift <= self.warning_threshold_micros {
            return;
        }
        let previous = self.last_warning.load(Ordering::Relaxed);
        let due =
            previous == i64::MIN || now.saturating_sub(previous) >= self.min_log_interval_micros;
        if due
            && self
                .last_warning
                .compare_exchange(previous, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            tracing::warn!(
                drift_micros = drift,
                "timestamps are ahead of the clock, the clock may have moved backwards"
            );
        }
    }
}

impl TimestampGenerator for MonotonicTimestampGenerator {
    fn next(&self) -> Option<i64> {
        let now = (self.clock)();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if now > last { now } else { last.saturating_add(1) };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.warn_drift(now, candidate);
                    return Some(candidate);
                }
                Err(actual) => last = actual,
            }
        }
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([
            (
                "warningThreshold",
                (self.warning_threshold_micros / 1000).to_string(),
            ),
            (
                "minLogInterval",
                (self.min_log_interval_micros / 1000).to_string(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn frozen_clock() -> i64 {
        1_000_000
    }

    #[test]
    fn test_strictly_increasing_with_frozen_clock() {
        let generator = MonotonicTimestampGenerator::default().with_clock(frozen_clock);
        let values: Vec<i64> = (0..5).filter_map(|_| generator.next()).collect();
        assert_eq!(values, vec![1_000_000, 1_000_001, 1_000_002, 1_000_003, 1_000_004]);
    }

    #[test]
    fn test_follows_system_clock() {
        let generator = MonotonicTimestampGenerator::default();
        let before = chrono::Utc::now().timestamp_micros();
        let ts = generator.next().unwrap();
        assert!(ts >= before);
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(MonotonicTimestampGenerator::default().with_clock(frozen_clock));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..1000).filter_map(|_| generator.next()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(all.insert(ts));
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_drift_beyond_threshold_keeps_incrementing() {
        let generator =
            MonotonicTimestampGenerator::new(Duration::from_micros(2), Duration::from_secs(1))
            .with_clock(frozen_clock);
        let last = (0..10).filter_map(|_| generator.next()).last().unwrap();
        assert_eq!(last, 1_000_009);
    }
}
