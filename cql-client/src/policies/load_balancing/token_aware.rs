use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use cql_core::{Result, Token};

use super::{LoadBalancingPolicy, QueryPlan, RegistryBinding};
use crate::cluster::{Host, HostDistance, HostRegistry};
use crate::execution::ExecutionOptions;
use crate::policies::PolicyOptions;

/// Routes a request to the replicas of its partition first.
///
/// When the options carry a routing key, the replicas owning its token that
/// the child policy ranks `LOCAL` are moved to the front of the child's
/// plan, in the child's order. The rest of the child plan follows without
/// duplicates.
#[derive(Debug)]
pub struct TokenAwarePolicy {
    child: Arc<dyn LoadBalancingPolicy>,
    registry: RegistryBinding,
}

impl TokenAwarePolicy {
    /// Wraps `child`.
    pub fn new(child: Arc<dyn LoadBalancingPolicy>) -> Self {
        Self {
            child,
            registry: RegistryBinding::default(),
        }
    }
}

impl LoadBalancingPolicy for TokenAwarePolicy {
    fn init(&self, registry: Arc<HostRegistry>) -> Result<()> {
        self.registry.bind(Arc::clone(&registry))?;
        self.child.init(registry)
    }

    fn distance(&self, host: &Host) -> HostDistance {
        self.child.distance(host)
    }

    fn new_query_plan(&self, keyspace: Option<&str>, options: &ExecutionOptions) -> QueryPlan {
        let child_plan = self.child.new_query_plan(keyspace, options);
        let (Some(routing_key), Some(registry)) = (options.routing_key(), self.registry.get())
        else {
            return child_plan;
        };

        let token = Token::from_routing_key(routing_key);
        let keyspace = keyspace.or(options.keyspace());
        let replicas: HashSet<SocketAddr> = registry
            .replicas(keyspace, token)
            .iter()
            .filter(|h| h.is_up() && self.child.distance(h) == HostDistance::Local)
            .map(|h| h.address())
            .collect();
        if replicas.is_empty() {
            return child_plan;
        }

        tracing::trace!(token = %token, replicas = replicas.len(), "routing to replicas");
        Box::new(ReplicasFirst {
            child: child_plan,
            pending_replicas: replicas,
            deferred: VecDeque::new(),
        })
    }

    fn options(&self) -> PolicyOptions {
        let mut options = self.child.options();
        options.insert("tokenAware", "true".to_string());
        options
    }
}

/// Pulls the child plan, yielding replicas as they appear and deferring
/// every other host until all replicas were yielded or the child is done.
struct ReplicasFirst {
    child: QueryPlan,
    pending_replicas: HashSet<SocketAddr>,
    deferred: VecDeque<Arc<Host>>,
}

impl Iterator for ReplicasFirst {
    type Item = Arc<Host>;

    fn next(&mut self) -> Option<Arc<Host>> {
        while !self.pending_replicas.is_empty() {
            match self.child.next() {
                Some(host) => {
                    if self.pending_replicas.remove(&host.address()) {
                        return Some(host);
                    }
                    self.deferred.push_back(host);
                }
                None => self.pending_replicas.clear(),
            }
        }
        while let Some(host) = self.deferred.pop_front() {
            if host.is_up() {
                return Some(host);
            }
        }
        self.child.next()
    }
}
