use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use cql_core::Result;

use super::{LoadBalancingPolicy, QueryPlan};
use crate::cluster::{Host, HostDistance, HostRegistry};
use crate::execution::ExecutionOptions;
use crate::policies::PolicyOptions;

/// Restricts a child policy to a fixed set of hosts.
///
/// Hosts outside the set are `IGNORED` and never appear in a plan.
#[derive(Debug)]
pub struct AllowListPolicy {
    child: Arc<dyn LoadBalancingPolicy>,
    allowed: Arc<HashSet<SocketAddr>>,
}

impl AllowListPolicy {
    /// Wraps `child`, admitting only `allowed`.
    pub fn new(
        child: Arc<dyn LoadBalancingPolicy>,
        allowed: impl IntoIterator<Item = SocketAddr>,
    ) -> Self {
        Self {
            child,
            allowed: Arc::new(allowed.into_iter().collect()),
        }
    }

    /// Whether `address` is admitted.
    pub fn is_allowed(&self, address: &SocketAddr) -> bool {
        self.allowed.contains(address)
    }
}

impl LoadBalancingPolicy for AllowListPolicy {
    fn init(&self, registry: Arc<HostRegistry>) -> Result<()> {
        self.child.init(registry)
    }

    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_allowed(&host.address()) {
            self.child.distance(host)
        } else {
            HostDistance::Ignored
        }
    }

    fn new_query_plan(&self, keyspace: Option<&str>, options: &ExecutionOptions) -> QueryPlan {
        let allowed = Arc::clone(&self.allowed);
        Box::new(
            self.child
                .new_query_plan(keyspace, options)
                .filter(move |h| allowed.contains(&h.address())),
        )
    }

    fn options(&self) -> PolicyOptions {
        let mut list: Vec<String> = self.allowed.iter().map(ToString::to_string).collect();
        list.sort();
        let mut options = self.child.options();
        options.insert("allowList", list.join(","));
        options
    }
}
