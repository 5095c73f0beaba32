//! Pluggable policies consulted by the orchestrator and the host registry.

pub mod address_resolution;
pub mod load_balancing;
pub mod reconnection;
pub mod retry;
pub mod speculative_execution;
pub mod timestamp_generation;

use std::collections::BTreeMap;
use std::sync::Arc;

use address_resolution::{AddressTranslator, IdentityTranslator};
use load_balancing::{DcAwareRoundRobinPolicy, LoadBalancingPolicy, TokenAwarePolicy};
use reconnection::{ExponentialReconnectionPolicy, ReconnectionPolicy};
use retry::{DefaultRetryPolicy, RetryPolicy};
use speculative_execution::{NoSpeculativeExecutionPolicy, SpeculativeExecutionPolicy};
use timestamp_generation::{MonotonicTimestampGenerator, TimestampGenerator};

/// Introspection options exposed by a policy, ordered by key.
pub type PolicyOptions = BTreeMap<&'static str, String>;

/// The policies used by a client.
#[derive(Debug, Clone)]
pub struct Policies {
    /// Query plan generation.
    pub load_balancing: Arc<dyn LoadBalancingPolicy>,
    /// Failure handling.
    pub retry: Arc<dyn RetryPolicy>,
    /// Backoff schedules for down hosts.
    pub reconnection: Arc<dyn ReconnectionPolicy>,
    /// Parallel re-attempts of idempotent statements.
    pub speculative_execution: Arc<dyn SpeculativeExecutionPolicy>,
    /// Discovery address to connect address mapping.
    pub address_resolution: Arc<dyn AddressTranslator>,
    /// Client-side write timestamps; `None` lets the server assign them.
    pub timestamp_generation: Option<Arc<dyn TimestampGenerator>>,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            load_balancing: default_load_balancing_policy(None),
            retry: Arc::new(DefaultRetryPolicy),
            reconnection: Arc::new(ExponentialReconnectionPolicy::default()),
            speculative_execution: Arc::new(NoSpeculativeExecutionPolicy),
            address_resolution: Arc::new(IdentityTranslator),
            timestamp_generation: Some(Arc::new(MonotonicTimestampGenerator::default())),
        }
    }
}

/// Token-aware routing over DC-aware round-robin.
pub fn default_load_balancing_policy(local_dc: Option<String>) -> Arc<dyn LoadBalancingPolicy> {
    let child = match local_dc {
        Some(dc) => DcAwareRoundRobinPolicy::with_local_dc(dc),
        None => DcAwareRoundRobinPolicy::new(),
    };
    Arc::new(TokenAwarePolicy::new(Arc::new(child)))
}
