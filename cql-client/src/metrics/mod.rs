//! Request metrics.
//!
//! The orchestrator reports every request outcome to a [`RequestMetrics`]
//! sink. [`NoopMetrics`] is the default; with the `metrics` feature,
//! [`PrometheusMetrics`] exports the counters in the Prometheus text format.

#[cfg(feature = "metrics")]
mod exporter;

use std::time::Duration;

#[cfg(feature = "metrics")]
pub use exporter::{MetricsError, PrometheusMetrics};

/// Receives request-level events from the orchestrator.
pub trait RequestMetrics: Send + Sync + std::fmt::Debug {
    /// A request completed successfully after `latency`.
    fn record_success(&self, latency: Duration);

    /// A request failed with an error of `kind` after `latency`.
    fn record_error(&self, kind: &'static str, latency: Duration);

    /// The retry policy returned `decision` for a failed attempt.
    fn record_retry(&self, decision: &'static str);

    /// A speculative execution was started.
    fn record_speculative_execution(&self);

    /// Number of hosts currently up.
    fn set_hosts_up(&self, _count: usize) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl RequestMetrics for NoopMetrics {
    fn record_success(&self, _latency: Duration) {}

    fn record_error(&self, _kind: &'static str, _latency: Duration) {}

    fn record_retry(&self, _decision: &'static str) {}

    fn record_speculative_execution(&self) {}
}
