use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use super::RequestMetrics;

/// Prometheus counters for request execution.
///
/// Every instance owns its registry, so several clients can coexist in one
/// process.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    retries_total: IntCounterVec,
    speculative_executions_total: IntCounter,
    errors_total: IntCounterVec,
    hosts_up: IntGauge,
}

impl PrometheusMetrics {
    /// Creates the metrics with names prefixed by `prefix`.
    pub fn new(prefix: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{}_requests_total", prefix),
                "Total number of requests by outcome",
            ),
            &["outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_request_duration_seconds", prefix),
                "Request duration in seconds by outcome",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["outcome"],
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new(
                format!("{}_retries_total", prefix),
                "Retry policy decisions by kind",
            ),
            &["decision"],
        )?;
        let speculative_executions_total = IntCounter::with_opts(Opts::new(
            format!("{}_speculative_executions_total", prefix),
            "Speculative executions started",
        ))?;
        let errors_total = IntCounterVec::new(
            Opts::new(
                format!("{}_errors_total", prefix),
                "Failed requests by error kind",
            ),
            &["kind"],
        )?;
        let hosts_up = IntGauge::with_opts(Opts::new(
            format!("{}_hosts_up", prefix),
            "Hosts currently up",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(speculative_executions_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(hosts_up.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            retries_total,
            speculative_executions_total,
            errors_total,
            hosts_up,
        })
    }

    /// Returns all metric families.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Renders the metrics in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::new(format!("invalid UTF-8: {}", e)))
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn observe(&self, outcome: &str, latency: Duration) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(latency.as_secs_f64());
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("hosts_up", &self.hosts_up.get())
            .finish_non_exhaustive()
    }
}

impl RequestMetrics for PrometheusMetrics {
    fn record_success(&self, latency: Duration) {
        self.observe("success", latency);
    }

    fn record_error(&self, kind: &'static str, latency: Duration) {
        self.observe("error", latency);
        self.errors_total.with_label_values(&[kind]).inc();
    }

    fn record_retry(&self, decision: &'static str) {
        self.retries_total.with_label_values(&[decision]).inc();
    }

    fn record_speculative_execution(&self) {
        self.speculative_executions_total.inc();
    }

    fn set_hosts_up(&self, count: usize) {
        self.hosts_up.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// Metric creation or encoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsError {
    message: String,
}

impl MetricsError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "metrics error: {}", self.message)
    }
}

impl std::error::Error for MetricsError {}

impl From<prometheus::Error> for MetricsError {
    fn from(err: prometheus::Error) -> Self {
        MetricsError::new(err.to_string())
    }
}
