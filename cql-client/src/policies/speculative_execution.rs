//! When to start additional executions of an idempotent request.

use std::collections::BTreeMap;
use std::time::Duration;

use cql_core::{DriverError, Result};

use super::PolicyOptions;

/// The speculative schedule of one request.
///
/// Each call returns the delay to wait after the previous execution
/// started before starting the next one, or `None` once no more
/// executions should be started.
pub trait SpeculativePlan: Send {
    /// Delay before the next execution.
    fn next_execution(&mut self) -> Option<Duration>;
}

/// Produces a speculative schedule per request.
pub trait SpeculativeExecutionPolicy: Send + Sync + std::fmt::Debug {
    /// Creates the schedule for one request.
    fn new_plan(&self, keyspace: Option<&str>, query: &str) -> Box<dyn SpeculativePlan>;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// Never starts speculative executions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeculativeExecutionPolicy;

struct NoSpeculation;

impl SpeculativePlan for NoSpeculation {
    fn next_execution(&mut self) -> Option<Duration> {
        None
    }
}

impl SpeculativeExecutionPolicy for NoSpeculativeExecutionPolicy {
    fn new_plan(&self, _keyspace: Option<&str>, _query: &str) -> Box<dyn SpeculativePlan> {
        Box::new(NoSpeculation)
    }
}

/// Starts up to `max_speculative_executions` extra executions, each
/// `delay` after the previous one.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeculativeExecutionPolicy {
    delay: Duration,
    max_speculative_executions: u32,
}

impl ConstantSpeculativeExecutionPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Construction`] if `max_speculative_executions`
    /// is zero.
    pub fn new(delay: Duration, max_speculative_executions: u32) -> Result<Self> {
        if max_speculative_executions == 0 {
            return Err(DriverError::Construction(
                "max_speculative_executions must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            delay,
            max_speculative_executions,
        })
    }

    /// Delay between executions.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Upper bound on extra executions per request.
    pub fn max_speculative_executions(&self) -> u32 {
        self.max_speculative_executions
    }
}

struct ConstantPlan {
    delay: Duration,
    remaining: u32,
}

impl SpeculativePlan for ConstantPlan {
    fn next_execution(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn new_plan(&self, _keyspace: Option<&str>, _query: &str) -> Box<dyn SpeculativePlan> {
        Box::new(ConstantPlan {
            delay: self.delay,
            remaining: self.max_speculative_executions,
        })
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([
            ("delay", self.delay.as_millis().to_string()),
            (
                "maxSpeculativeExecutions",
                self.max_speculative_executions.to_string(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_speculation_plan_is_empty() {
        let mut plan = NoSpeculativeExecutionPolicy.new_plan(None, "SELECT 1");
        assert_eq!(plan.next_execution(), None);
    }

    #[test]
    fn test_constant_plan_yields_max_delays() {
        let policy = ConstantSpeculativeExecutionPolicy::new(Duration::from_millis(50), 2).unwrap();
        let mut plan = policy.new_plan(Some("ks"), "SELECT 1");
        assert_eq!(plan.next_execution(), Some(Duration::from_millis(50)));
        assert_eq!(plan.next_execution(), Some(Duration::from_millis(50)));
        assert_eq!(plan.next_execution(), None);
        assert_eq!(plan.next_execution(), None);

        let mut fresh = policy.new_plan(None, "SELECT 1");
        assert!(fresh.next_execution().is_some());
    }

    #[test]
    fn test_zero_max_is_rejected() {
        let err = ConstantSpeculativeExecutionPolicy::new(Duration::from_millis(1), 0).unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_options() {
        let policy =
            ConstantSpeculativeExecutionPolicy::new(Duration::from_millis(200), 3).unwrap();
        let options = policy.options();
        assert_eq!(options.get("delay").map(String::as_str), Some("200"));
        assert_eq!(
            options.get("maxSpeculativeExecutions").map(String::as_str),
            Some("3")
        );
    }
}
