use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use cql_core::{Consistency, DriverError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{ExecutionInfo, ExecutionOptions, OperationInfo, Request, ResultSet, Statement};
use crate::cluster::{Host, HostRegistry};
use crate::connection::{RequestSlots, Transport};
use crate::metrics::RequestMetrics;
use crate::policies::load_balancing::QueryPlan;
use crate::policies::retry::DecisionInfo;
use crate::policies::Policies;

/// State shared by every execution of one request.
struct RequestState {
    info: OperationInfo,
    plan: Mutex<QueryPlan>,
    timestamp: Option<i64>,
    errors: Mutex<Vec<(SocketAddr, String)>>,
    tried: Mutex<Vec<SocketAddr>>,
}

impl RequestState {
    /// Next host of the shared plan; executions never receive the same host.
    fn next_host(&self) -> Option<Arc<Host>> {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }

    fn record_error(&self, address: SocketAddr, error: &DriverError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address, error.to_string()));
    }

    fn record_attempt(&self, address: SocketAddr) {
        self.tried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(address);
    }
}

/// How one execution ended.
enum Outcome {
    Success {
        result: ResultSet,
        host: SocketAddr,
        consistency: Consistency,
    },
    /// Terminal failure for the whole request.
    Failed(DriverError),
    /// The shared plan ran out of hosts.
    Exhausted,
}

/// What the orchestrator does with a failed attempt.
enum Classified {
    Decision(DecisionInfo),
    NextHost,
    Terminal,
}

/// Drives one logical request to exactly one outcome.
///
/// A request walks a single query plan. The first execution starts on the
/// first host; failures are routed to the retry policy. For idempotent
/// statements, the speculative execution policy may start more executions
/// on the next hosts of the same plan. The first success wins and every
/// other execution is dropped.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    registry: Arc<HostRegistry>,
    transport: Arc<dyn Transport>,
    policies: Policies,
    slots: Arc<RequestSlots>,
    metrics: Arc<dyn RequestMetrics>,
}

impl RequestHandler {
    /// Creates a handler over shared client state.
    pub fn new(
        registry: Arc<HostRegistry>,
        transport: Arc<dyn Transport>,
        policies: Policies,
        slots: Arc<RequestSlots>,
        metrics: Arc<dyn RequestMetrics>,
    ) -> Self {
        Self {
            registry,
            transport,
            policies,
            slots,
            metrics,
        }
    }

    /// The registry the handler plans over.
    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Executes `statement`, bounded by the options' request timeout.
    pub async fn execute(
        &self,
        statement: Statement,
        options: ExecutionOptions,
    ) -> Result<ResultSet> {
        self.execute_with_cancellation(statement, options, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), also stopping when `cancel` fires.
    /// Stopping drops every execution and releases their request slots.
    #[instrument(
        name = "request.execute",
        skip_all,
        fields(query = %statement.query(), keyspace = options.keyspace().unwrap_or_default())
    )]
    pub async fn execute_with_cancellation(
        &self,
        statement: Statement,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<ResultSet> {
        let started = Instant::now();
        let timeout = options.request_timeout();
        let run = self.run(Arc::new(statement), Arc::new(options));

        let result = tokio::select! {
            result = run_with_timeout(run, timeout) => result,
            _ = cancel.cancelled() => Err(DriverError::Cancelled),
        };

        let latency = started.elapsed();
        match &result {
            Ok(rs) => {
                tracing::debug!(
                    host = ?rs.info().queried_host,
                    retries = rs.info().retry_count,
                    latency = ?latency,
                    "request succeeded"
                );
                self.metrics.record_success(latency);
            }
            Err(e) => {
                tracing::debug!(error = %e, latency = ?latency, "request failed");
                self.metrics.record_error(e.kind(), latency);
            }
        }
        result
    }

    async fn run(
        &self,
        statement: Arc<Statement>,
        options: Arc<ExecutionOptions>,
    ) -> Result<ResultSet> {
        let keyspace = options.keyspace();
        let mut plan = self
            .policies
            .load_balancing
            .new_query_plan(keyspace, &options);
        let Some(first) = plan.next() else {
            return Err(DriverError::no_host_available(Vec::new()));
        };

        let timestamp = options.timestamp().or_else(|| {
            self.policies
                .timestamp_generation
                .as_ref()
                .and_then(|g| g.next())
        });
        let mut speculation = options.is_idempotent().then(|| {
            self.policies
                .speculative_execution
                .new_plan(keyspace, statement.query())
        });
        let state = Arc::new(RequestState {
            info: OperationInfo::new(statement, Arc::clone(&options)),
            plan: Mutex::new(plan),
            timestamp,
            errors: Mutex::new(Vec::new()),
            tried: Mutex::new(Vec::new()),
        });

        let mut executions = FuturesUnordered::new();
        executions.push(self.run_execution(Arc::clone(&state), Some(first), 0));
        let mut next_speculative = speculation
            .as_mut()
            .and_then(|s| s.next_execution())
            .map(|delay| Instant::now() + delay);
        let mut speculative_executions = 0u32;

        loop {
            let deadline = next_speculative;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                outcome = executions.next() => match outcome {
                    Some(Outcome::Success { mut result, host, consistency }) => {
                        let tried_hosts = std::mem::take(
                            &mut *state.tried.lock().unwrap_or_else(PoisonError::into_inner),
                        );
                        result.set_info(ExecutionInfo {
                            queried_host: Some(host),
                            tried_hosts,
                            speculative_executions,
                            retry_count: state.info.retry_count(),
                            achieved_consistency: Some(consistency),
                        });
                        return Ok(result);
                    }
                    Some(Outcome::Failed(e)) => return Err(e),
                    Some(Outcome::Exhausted) | None => {
                        if executions.is_empty() {
                            let errors = std::mem::take(
                                &mut *state.errors.lock().unwrap_or_else(PoisonError::into_inner),
                            );
                            return Err(DriverError::no_host_available(errors));
                        }
                    }
                },
                _ = timer => {
                    match state.next_host() {
                        Some(host) => {
                            speculative_executions += 1;
                            self.metrics.record_speculative_execution();
                            tracing::debug!(
                                execution = speculative_executions,
                                address = %host.address(),
                                "starting speculative execution"
                            );
                            executions.push(self.run_execution(
                                Arc::clone(&state),
                                Some(host),
                                speculative_executions,
                            ));
                            next_speculative = speculation
                                .as_mut()
                                .and_then(|s| s.next_execution())
                                .map(|delay| Instant::now() + delay);
                        }
                        None => next_speculative = None,
                    }
                }
            }
        }
    }

    /// One execution: attempts on successive plan hosts until success, a
    /// terminal decision or plan exhaustion.
    async fn run_execution(
        &self,
        state: Arc<RequestState>,
        mut current: Option<Arc<Host>>,
        execution_index: u32,
    ) -> Outcome {
        let options = state.info.options();
        let mut consistency = options.consistency();

        loop {
            let host = match current.take() {
                Some(host) => host,
                None => match state.next_host() {
                    Some(host) => host,
                    None => return Outcome::Exhausted,
                },
            };
            let address = host.address();
            if !host.is_up() {
                tracing::debug!(address = %address, "skipping host that is no longer up");
                continue;
            }

            let slot = match self.slots.acquire(address).await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::debug!(
                        address = %address,
                        error = %e,
                        "no request slot, trying next host"
                    );
                    state.record_error(address, &e);
                    continue;
                }
            };

            state.record_attempt(address);
            let request = Request::new(
                state.info.shared_statement(),
                state.info.shared_options(),
                consistency,
                state.timestamp,
                execution_index,
            );
            let result = self.transport.send(&host, &request).await;
            drop(slot);

            let error = match result {
                Ok(result) => {
                    return Outcome::Success {
                        result,
                        host: address,
                        consistency,
                    }
                }
                Err(e) => e,
            };

            let decision = match self.classify(&state.info, consistency, &error) {
                Classified::Decision(decision) => decision,
                Classified::NextHost => {
                    state.record_error(address, &error);
                    continue;
                }
                Classified::Terminal => {
                    tracing::debug!(address = %address, error = %error, "unrecoverable error");
                    return Outcome::Failed(error);
                }
            };
            self.metrics.record_retry(decision.label());
            tracing::debug!(
                address = %address,
                error = %error,
                decision = decision.label(),
                "retry policy decision"
            );

            match decision {
                DecisionInfo::Retry {
                    consistency: new_consistency,
                    use_current_host,
                } => {
                    state.info.increment_retry_count();
                    state.record_error(address, &error);
                    if let Some(c) = new_consistency {
                        consistency = c;
                    }
                    if use_current_host && host.is_up() {
                        current = Some(host);
                    }
                }
                DecisionInfo::Rethrow => return Outcome::Failed(error),
                DecisionInfo::Ignore => {
                    return Outcome::Success {
                        result: ResultSet::empty(),
                        host: address,
                        consistency,
                    }
                }
            }
        }
    }

    fn classify(
        &self,
        info: &OperationInfo,
        consistency: Consistency,
        error: &DriverError,
    ) -> Classified {
        let retry = &self.policies.retry;
        let decision = match error {
            DriverError::ReadTimeout {
                received,
                block_for,
                data_present,
                ..
            } => retry.on_read_timeout(info, consistency, *received, *block_for, *data_present),
            DriverError::WriteTimeout {
                received,
                block_for,
                write_type,
                ..
            } => retry.on_write_timeout(info, consistency, *received, *block_for, *write_type),
            DriverError::Unavailable {
                required, alive, ..
            } => retry.on_unavailable(info, consistency, *required, *alive),
            DriverError::Connection(_)
            | DriverError::OperationTimedOut { .. }
            | DriverError::Io(_) => retry.on_request_error(info, consistency, error),
            DriverError::Response { code, .. } if code.is_retryable() => {
                retry.on_request_error(info, consistency, error)
            }
            DriverError::Busy { .. } => return Classified::NextHost,
            _ => return Classified::Terminal,
        };
        Classified::Decision(decision)
    }
}

async fn run_with_timeout<F>(run: F, timeout: Option<std::time::Duration>) -> Result<ResultSet>
where
    F: std::future::Future<Output = Result<ResultSet>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .unwrap_or(Err(DriverError::RequestTimedOut(limit))),
        None => run.await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use cql_core::ResponseErrorCode;

    use super::*;
    use crate::config::PoolingConfig;
    use crate::metrics::NoopMetrics;
    use crate::policies::load_balancing::{LoadBalancingPolicy, RoundRobinPolicy};
    use crate::policies::retry::{DefaultRetryPolicy, FallthroughRetryPolicy, RetryPolicy};

    /// Fails each host with its scripted errors, in order, then succeeds.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        failures: Mutex<HashMap<SocketAddr, Vec<DriverError>>>,
        sent: Mutex<Vec<(SocketAddr, Consistency)>>,
    }

    impl ScriptedTransport {
        fn fail(self, address: SocketAddr, errors: Vec<DriverError>) -> Self {
            self.failures.lock().unwrap().insert(address, errors);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, host: &Host, request: &Request) -> Result<ResultSet> {
            self.sent
                .lock()
                .unwrap()
                .push((host.address(), request.consistency()));
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&host.address()) {
                Some(errors) if !errors.is_empty() => Err(errors.remove(0)),
                _ => Ok(ResultSet::empty()),
            }
        }

        async fn connect(&self, _host: &Host) -> Result<()> {
            Ok(())
        }
    }

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:9042", n).parse().unwrap()
    }

    fn handler(
        hosts: u8,
        transport: Arc<ScriptedTransport>,
        retry: Arc<dyn RetryPolicy>,
    ) -> RequestHandler {
        let registry = Arc::new(HostRegistry::new());
        for n in 1..=hosts {
            registry.add_host(Host::new(addr(n)));
        }
        let load_balancing = Arc::new(RoundRobinPolicy::new());
        load_balancing.init(Arc::clone(&registry)).unwrap();
        let policies = Policies {
            load_balancing,
            retry,
            ..Policies::default()
        };
        RequestHandler::new(
            registry,
            transport,
            policies,
            Arc::new(RequestSlots::new(PoolingConfig::default())),
            Arc::new(NoopMetrics),
        )
    }

    fn read_timeout(received: u32) -> DriverError {
        DriverError::ReadTimeout {
            consistency: Consistency::Quorum,
            received,
            block_for: 2,
            data_present: false,
        }
    }

    #[tokio::test]
    async fn test_empty_plan_is_no_host_available() {
        let transport = Arc::new(ScriptedTransport::default());
        let handler = handler(0, Arc::clone(&transport), Arc::new(DefaultRetryPolicy));
        let err = handler
            .execute(Statement::new("SELECT 1"), ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::NoHostAvailable { ref errors, .. } if errors.is_empty()
        ));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_host_retry_after_read_timeout() {
        let transport = Arc::new(ScriptedTransport::default().fail(addr(1), vec![read_timeout(2)]));
        let handler = handler(2, Arc::clone(&transport), Arc::new(DefaultRetryPolicy));
        let rs = handler
            .execute(Statement::new("SELECT 1"), ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(rs.info().queried_host, Some(addr(1)));
        assert_eq!(rs.info().retry_count, 1);
        assert_eq!(rs.info().tried_hosts, vec![addr(1), addr(1)]);
    }

    #[tokio::test]
    async fn test_rethrow_is_terminal() {
        let transport = Arc::new(ScriptedTransport::default().fail(addr(1), vec![read_timeout(1)]));
        let handler = handler(2, Arc::clone(&transport), Arc::new(DefaultRetryPolicy));
        let err = handler
            .execute(Statement::new("SELECT 1"), ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ReadTimeout { received: 1, .. }));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_is_not_retried() {
        let syntax = DriverError::Response {
            code: ResponseErrorCode::SyntaxError,
            message: "line 1:0 no viable alternative".into(),
        };
        let transport = Arc::new(ScriptedTransport::default().fail(addr(1), vec![syntax]));
        let handler = handler(3, Arc::clone(&transport), Arc::new(DefaultRetryPolicy));
        let err = handler
            .execute(Statement::new("SELEC 1"), ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Response { code: ResponseErrorCode::SyntaxError, .. }));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connection_errors_exhaust_plan() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .fail(addr(1), vec![DriverError::Connection("reset".into())])
                .fail(addr(2), vec![DriverError::Connection("refused".into())]),
        );
        let handler = handler(2, Arc::clone(&transport), Arc::new(DefaultRetryPolicy));
        let err = handler
            .execute(Statement::new("SELECT 1"), ExecutionOptions::default())
            .await
            .unwrap_err();
        match err {
            DriverError::NoHostAvailable { errors, .. } => {
                let hosts: Vec<_> = errors.iter().map(|(a, _)| *a).collect();
                assert_eq!(hosts, vec![addr(1), addr(2)]);
                assert!(errors[0].1.contains("reset"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallthrough_rethrows_request_error() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .fail(addr(1), vec![DriverError::Connection("reset".into())]),
        );
        let handler = handler(2, Arc::clone(&transport), Arc::new(FallthroughRetryPolicy));
        let err = handler
            .execute(Statement::new("SELECT 1"), ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }

    #[derive(Debug)]
    struct DowngradingPolicy;

    impl RetryPolicy for DowngradingPolicy {
        fn on_read_timeout(
            &self,
            _: &OperationInfo,
            _: Consistency,
            _: u32,
            _: u32,
            _: bool,
        ) -> DecisionInfo {
            DecisionInfo::retry_next_host(Some(Consistency::One))
        }
        fn on_write_timeout(
            &self,
            _: &OperationInfo,
            _: Consistency,
            _: u32,
            _: u32,
            _: cql_core::WriteType,
        ) -> DecisionInfo {
            DecisionInfo::Ignore
        }
        fn on_unavailable(
            &self,
            _: &OperationInfo,
            _: Consistency,
            _: u32,
            _: u32,
        ) -> DecisionInfo {
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

    #[tokio::test]
    async fn test_retry_applies_consistency_override() {
        let transport = Arc::new(ScriptedTransport::default().fail(addr(1), vec![read_timeout(0)]));
        let handler = handler(2, Arc::clone(&transport), Arc::new(DowngradingPolicy));
        let options = ExecutionOptions::builder()
            .consistency(Consistency::Quorum)
            .build()
            .unwrap();
        let rs = handler.execute(Statement::new("SELECT 1"), options).await.unwrap();
        assert_eq!(rs.info().achieved_consistency, Some(Consistency::One));
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![(addr(1), Consistency::Quorum), (addr(2), Consistency::One)]
        );
    }

    #[tokio::test]
    async fn test_ignore_returns_empty_success() {
        let write_timeout = DriverError::WriteTimeout {
            consistency: Consistency::Quorum,
            received: 0,
            block_for: 2,
            write_type: cql_core::WriteType::Simple,
        };
        let transport = Arc::new(ScriptedTransport::default().fail(addr(1), vec![write_timeout]));
        let handler = handler(2, Arc::clone(&transport), Arc::new(DowngradingPolicy));
        let rs = handler
            .execute(Statement::new("INSERT"), ExecutionOptions::default())
            .await
            .unwrap();
        assert!(rs.rows().is_empty());
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_request() {
        #[derive(Debug)]
        struct Hanging;

        #[async_trait]
        impl Transport for Hanging {
            async fn send(&self, _host: &Host, _request: &Request) -> Result<ResultSet> {
                std::future::pending().await
            }
            async fn connect(&self, _host: &Host) -> Result<()> {
                Ok(())
            }
        }

        let registry = Arc::new(HostRegistry::new());
        registry.add_host(Host::new(addr(1)));
        let load_balancing = Arc::new(RoundRobinPolicy::new());
        load_balancing.init(Arc::clone(&registry)).unwrap();
        let slots = Arc::new(RequestSlots::new(PoolingConfig::default()));
        let handler = RequestHandler::new(
            registry,
            Arc::new(Hanging),
            Policies {
                load_balancing,
                ..Policies::default()
            },
            Arc::clone(&slots),
            Arc::new(NoopMetrics),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = handler
            .execute_with_cancellation(
                Statement::new("SELECT 1"),
                ExecutionOptions::default(),
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled));
        assert_eq!(slots.in_flight(&addr(1)), 0);
    }
}
