//! Load balancing: which hosts receive a request, and in which order.
//!
//! A policy yields a lazy [`QueryPlan`] per request. Plans skip hosts that
//! are `IGNORED` or not `UP` when pulled, so a host going down while a
//! plan is iterated is simply passed over. Decorators
//! ([`TokenAwarePolicy`], [`AllowListPolicy`]) hold the policy they wrap.

mod allow_list;
mod dc_aware;
mod round_robin;
mod token_aware;

use std::sync::{Arc, OnceLock};

use cql_core::{DriverError, Result};

use super::PolicyOptions;
use crate::cluster::{Host, HostDistance, HostRegistry};
use crate::execution::ExecutionOptions;

pub use allow_list::AllowListPolicy;
pub use dc_aware::DcAwareRoundRobinPolicy;
pub use round_robin::RoundRobinPolicy;
pub use token_aware::TokenAwarePolicy;

/// An ordered, lazily produced sequence of candidate hosts.
pub type QueryPlan = Box<dyn Iterator<Item = Arc<Host>> + Send>;

/// A strategy producing query plans over the registry's hosts.
pub trait LoadBalancingPolicy: Send + Sync + std::fmt::Debug {
    /// Binds the policy to the registry it reads hosts from.
    fn init(&self, registry: Arc<HostRegistry>) -> Result<()>;

    /// Classifies a host. Pure in configuration and topology.
    fn distance(&self, host: &Host) -> HostDistance;

    /// Hosts to try for one request, in order.
    fn new_query_plan(&self, keyspace: Option<&str>, options: &ExecutionOptions) -> QueryPlan;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// An empty plan.
pub fn empty_plan() -> QueryPlan {
    Box::new(std::iter::empty())
}

/// The registry a policy was initialized with.
#[derive(Debug, Default)]
pub(crate) struct RegistryBinding(OnceLock<Arc<HostRegistry>>);

impl RegistryBinding {
    /// Binds once; binding the same registry again is a no-op.
    pub(crate) fn bind(&self, registry: Arc<HostRegistry>) -> Result<()> {
        let bound = self.0.get_or_init(|| Arc::clone(&registry));
        if Arc::ptr_eq(bound, &registry) {
            Ok(())
        } else {
            Err(DriverError::Configuration(
                "load balancing policy is already bound to another host registry".to_string(),
            ))
        }
    }

    pub(crate) fn get(&self) -> Option<&Arc<HostRegistry>> {
        self.0.get()
    }
}

/// Yields `hosts` starting at `start` and wrapping once around.
pub(crate) fn rotation(
    hosts: Arc<[Arc<Host>]>,
    start: usize,
) -> impl Iterator<Item = Arc<Host>> + Send {
    let len = hosts.len();
    (0..len).map(move |i| Arc::clone(&hosts[(start + i) % len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_accepts_same_registry_twice() {
        let binding = RegistryBinding::default();
        let registry = Arc::new(HostRegistry::new());
        binding.bind(Arc::clone(&registry)).unwrap();
        binding.bind(Arc::clone(&registry)).unwrap();
        assert!(binding.bind(Arc::new(HostRegistry::new())).is_err());
    }

    #[test]
    fn test_rotation_wraps() {
        let hosts: Arc<[Arc<Host>]> = (1..=3)
            .map(|n| Arc::new(Host::new(format!("10.0.0.{}:9042", n).parse().unwrap())))
            .collect();
        let order: Vec<String> = rotation(hosts, 1)
            .map(|h| h.address().ip().to_string())
            .collect();
        assert_eq!(order, vec!["10.0.0.2", "10.0.0.3", "10.0.0.1"]);
    }
}
