//! Retry decisions per failure kind.
//!
//! Policies are pure: a decision depends only on the arguments, never on
//! cluster state.

use std::sync::Arc;

use cql_core::{Consistency, DriverError, WriteType};

use super::PolicyOptions;
use crate::execution::OperationInfo;

/// What the orchestrator does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionInfo {
    /// Try again.
    Retry {
        /// Consistency for the next attempt; `None` keeps the current one.
        consistency: Option<Consistency>,
        /// Retry on the same host rather than the next host of the plan.
        use_current_host: bool,
    },
    /// Surface the error to the caller.
    Rethrow,
    /// Report success with an empty result.
    Ignore,
}

impl DecisionInfo {
    /// Retry on the same host.
    pub fn retry_same_host(consistency: Option<Consistency>) -> Self {
        DecisionInfo::Retry {
            consistency,
            use_current_host: true,
        }
    }

    /// Retry on the next host of the plan.
    pub fn retry_next_host(consistency: Option<Consistency>) -> Self {
        DecisionInfo::Retry {
            consistency,
            use_current_host: false,
        }
    }

    /// Whether this decision retries.
    pub fn is_retry(&self) -> bool {
        matches!(self, DecisionInfo::Retry { .. })
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DecisionInfo::Retry {
                use_current_host: true,
                ..
            } => "retry_same_host",
            DecisionInfo::Retry { .. } => "retry_next_host",
            DecisionInfo::Rethrow => "rethrow",
            DecisionInfo::Ignore => "ignore",
        }
    }
}

/// Decides how to react to each failure kind.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Replicas did not answer a read in time.
    fn on_read_timeout(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        received: u32,
        block_for: u32,
        data_present: bool,
    ) -> DecisionInfo;

    /// Replicas did not acknowledge a write in time.
    fn on_write_timeout(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        received: u32,
        block_for: u32,
        write_type: WriteType,
    ) -> DecisionInfo;

    /// The coordinator knew too few replicas were alive.
    fn on_unavailable(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        required: u32,
        alive: u32,
    ) -> DecisionInfo;

    /// Connection failure, client-side timeout or a retryable server error.
    fn on_request_error(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        error: &DriverError,
    ) -> DecisionInfo;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// Retries once when the failure suggests the next attempt will succeed.
///
/// - read timeout: same host, when enough replicas answered and the
///   statement is idempotent or no data was returned yet
/// - write timeout: same host, for batch log writes (nothing applied yet)
///   or idempotent statements that reached enough replicas
/// - unavailable: next host, once
/// - request error: next host
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn on_read_timeout(
        &self,
        info: &OperationInfo,
        _consistency: Consistency,
        received: u32,
        block_for: u32,
        data_present: bool,
    ) -> DecisionInfo {
        if info.retry_count() > 0 {
            return DecisionInfo::Rethrow;
        }
        if received >= block_for && (info.is_idempotent() || !data_present) {
            DecisionInfo::retry_same_host(None)
        } else {
            DecisionInfo::Rethrow
        }
    }

    fn on_write_timeout(
        &self,
        info: &OperationInfo,
        _consistency: Consistency,
        received: u32,
        block_for: u32,
        write_type: WriteType,
    ) -> DecisionInfo {
        if info.retry_count() > 0 {
            return DecisionInfo::Rethrow;
        }
        let not_applied = write_type == WriteType::BatchLog;
        if not_applied || (received >= block_for && info.is_idempotent()) {
            DecisionInfo::retry_same_host(None)
        } else {
            DecisionInfo::Rethrow
        }
    }

    fn on_unavailable(
        &self,
        info: &OperationInfo,
        _consistency: Consistency,
        _required: u32,
        _alive: u32,
    ) -> DecisionInfo {
        if info.retry_count() == 0 {
            DecisionInfo::retry_next_host(None)
        } else {
            DecisionInfo::Rethrow
        }
    }

    fn on_request_error(
        &self,
        _info: &OperationInfo,
        _consistency: Consistency,
        _error: &DriverError,
    ) -> DecisionInfo {
        DecisionInfo::retry_next_host(None)
    }
}

/// Never retries a non-idempotent statement after a timeout or request
/// error, whatever the wrapped policy says.
#[derive(Debug, Clone)]
pub struct IdempotenceAwareRetryPolicy {
    child: Arc<dyn RetryPolicy>,
}

impl IdempotenceAwareRetryPolicy {
    /// Wraps `child`.
    pub fn new(child: Arc<dyn RetryPolicy>) -> Self {
        Self { child }
    }
}

impl Default for IdempotenceAwareRetryPolicy {
    fn default() -> Self {
        Self::new(Arc::new(DefaultRetryPolicy))
    }
}

impl RetryPolicy for IdempotenceAwareRetryPolicy {
    fn on_read_timeout(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        received: u32,
        block_for: u32,
        data_present: bool,
    ) -> DecisionInfo {
        if !info.is_idempotent() {
            return DecisionInfo::Rethrow;
        }
        self.child
            .on_read_timeout(info, consistency, received, block_for, data_present)
    }

    fn on_write_timeout(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        received: u32,
        block_for: u32,
        write_type: WriteType,
    ) -> DecisionInfo {
        if !info.is_idempotent() {
            return DecisionInfo::Rethrow;
        }
        self.child
            .on_write_timeout(info, consistency, received, block_for, write_type)
    }

    fn on_unavailable(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        required: u32,
        alive: u32,
    ) -> DecisionInfo {
        // Unavailable is raised before any replica is contacted.
        self.child.on_unavailable(info, consistency, required, alive)
    }

    fn on_request_error(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        error: &DriverError,
    ) -> DecisionInfo {
        if !info.is_idempotent() {
            return DecisionInfo::Rethrow;
        }
        self.child.on_request_error(info, consistency, error)
    }

    fn options(&self) -> PolicyOptions {
        let mut options = self.child.options();
        options.insert("idempotenceAware", "true".to_string());
        options
    }
}

/// Always rethrows, leaving every failure to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn on_read_timeout(
        &self,
        _: &OperationInfo,
        _: Consistency,
        _: u32,
        _: u32,
        _: bool,
    ) -> DecisionInfo {
        DecisionInfo::Rethrow
    }

    fn on_write_timeout(
        &self,
        _: &OperationInfo,
        _: Consistency,
        _: u32,
        _: u32,
        _: WriteType,
    ) -> DecisionInfo {
        DecisionInfo::Rethrow
    }

    fn on_unavailable(&self, _: &OperationInfo, _: Consistency, _: u32, _: u32) -> DecisionInfo {
        DecisionInfo::Rethrow
    }

    fn on_request_error(
        &self,
        _: &OperationInfo,
        _: Consistency,
        _: &DriverError,
    ) -> DecisionInfo {
        DecisionInfo::Rethrow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionOptions, Statement};

    fn info(idempotent: bool) -> OperationInfo {
        let options = ExecutionOptions::builder().idempotent(idempotent).build().unwrap();
        OperationInfo::new(Arc::new(Statement::new("SELECT * FROM t")), Arc::new(options))
    }

    const CL: Consistency = Consistency::Quorum;

    #[test]
    fn test_read_timeout_retries_when_enough_replicas_answered() {
        let policy = DefaultRetryPolicy;
        assert_eq!(
            policy.on_read_timeout(&info(true), CL, 2, 2, true),
            DecisionInfo::retry_same_host(None)
        );
        assert_eq!(
            policy.on_read_timeout(&info(false), CL, 2, 2, false),
            DecisionInfo::retry_same_host(None)
        );
        assert_eq!(
            policy.on_read_timeout(&info(false), CL, 2, 2, true),
            DecisionInfo::Rethrow
        );
        assert_eq!(
            policy.on_read_timeout(&info(true), CL, 1, 2, false),
            DecisionInfo::Rethrow
        );
    }

    #[test]
    fn test_only_one_retry() {
        let policy = DefaultRetryPolicy;
        let info = info(true);
        info.increment_retry_count();
        assert_eq!(policy.on_read_timeout(&info, CL, 2, 2, false), DecisionInfo::Rethrow);
        assert_eq!(
            policy.on_write_timeout(&info, CL, 2, 2, WriteType::BatchLog),
            DecisionInfo::Rethrow
        );
        assert_eq!(policy.on_unavailable(&info, CL, 3, 1), DecisionInfo::Rethrow);
    }

    #[test]
    fn test_write_timeout_rules() {
        let policy = DefaultRetryPolicy;
        assert!(policy
            .on_write_timeout(&info(false), CL, 0, 2, WriteType::BatchLog)
            .is_retry());
        assert!(policy
            .on_write_timeout(&info(true), CL, 2, 2, WriteType::Simple)
            .is_retry());
        assert_eq!(
            policy.on_write_timeout(&info(false), CL, 2, 2, WriteType::Simple),
            DecisionInfo::Rethrow
        );
    }

    #[test]
    fn test_unavailable_and_request_error_go_to_next_host() {
        let policy = DefaultRetryPolicy;
        assert_eq!(
            policy.on_unavailable(&info(false), CL, 3, 1),
            DecisionInfo::retry_next_host(None)
        );
        let err = DriverError::Connection("reset".into());
        assert_eq!(
            policy.on_request_error(&info(false), CL, &err),
            DecisionInfo::retry_next_host(None)
        );
    }

    #[test]
    fn test_idempotence_aware_rethrows_non_idempotent() {
        let policy = IdempotenceAwareRetryPolicy::default();
        assert_eq!(
            policy.on_read_timeout(&info(false), CL, 3, 2, false),
            DecisionInfo::Rethrow
        );
        assert_eq!(
            policy.on_write_timeout(&info(false), CL, 0, 2, WriteType::BatchLog),
            DecisionInfo::Rethrow
        );
        let err = DriverError::Connection("reset".into());
        assert_eq!(
            policy.on_request_error(&info(false), CL, &err),
            DecisionInfo::Rethrow
        );
        assert!(policy.on_unavailable(&info(false), CL, 3, 1).is_retry());
    }

    #[test]
    fn test_idempotence_aware_delegates_idempotent() {
        let policy = IdempotenceAwareRetryPolicy::default();
        assert_eq!(
            policy.on_read_timeout(&info(true), CL, 3, 2, true),
            DecisionInfo::retry_same_host(None)
        );
        assert_eq!(
            policy.options().get("idempotenceAware").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_fallthrough_always_rethrows() {
        let policy = FallthroughRetryPolicy;
        let err = DriverError::Connection("reset".into());
        assert_eq!(policy.on_read_timeout(&info(true), CL, 2, 2, false), DecisionInfo::Rethrow);
        assert_eq!(
            policy.on_write_timeout(&info(true), CL, 0, 1, WriteType::BatchLog),
            DecisionInfo::Rethrow
        );
        assert_eq!(policy.on_unavailable(&info(true), CL, 1, 0), DecisionInfo::Rethrow);
        assert_eq!(policy.on_request_error(&info(true), CL, &err), DecisionInfo::Rethrow);
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(DecisionInfo::retry_same_host(None).label(), "retry_same_host");
        assert_eq!(DecisionInfo::retry_next_host(None).label(), "retry_next_host");
        assert_eq!(DecisionInfo::Ignore.label(), "ignore");
    }
}
