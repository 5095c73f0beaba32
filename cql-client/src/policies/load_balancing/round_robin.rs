use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cql_core::Result;

use super::{empty_plan, rotation, LoadBalancingPolicy, QueryPlan, RegistryBinding};
use crate::cluster::{Host, HostDistance, HostRegistry};
use crate::execution::ExecutionOptions;

/// Cycles through every host, starting one position further on each plan.
///
/// All hosts are `LOCAL`; down hosts are skipped.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    registry: RegistryBinding,
    index: AtomicUsize,
}

impl RoundRobinPolicy {
    /// Creates a new round-robin policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn init(&self, registry: Arc<HostRegistry>) -> Result<()> {
        self.registry.bind(registry)
    }

    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn new_query_plan(&self, _keyspace: Option<&str>, _options: &ExecutionOptions) -> QueryPlan {
        let Some(registry) = self.registry.get() else {
            return empty_plan();
        };
        let hosts = registry.snapshot().shared_hosts();
        if hosts.is_empty() {
            return empty_plan();
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed) % hosts.len();
        Box::new(rotation(hosts, start).filter(|h| h.is_up()))
    }
}
