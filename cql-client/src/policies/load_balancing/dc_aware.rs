use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use cql_core::Result;

use super::{empty_plan, rotation, LoadBalancingPolicy, QueryPlan, RegistryBinding};
use crate::cluster::{Host, HostDistance, HostRegistry};
use crate::execution::ExecutionOptions;
use crate::policies::PolicyOptions;

const DEFAULT_USED_HOSTS_PER_REMOTE_DC: usize = 0;

/// Hosts split by datacenter at one topology version.
#[derive(Debug)]
struct DcPartition {
    version: u64,
    local: Arc<[Arc<Host>]>,
    remote: Arc<[Arc<Host>]>,
    remote_addresses: HashSet<SocketAddr>,
}

/// Round-robin over the local datacenter, with a bounded remote tail.
///
/// The local datacenter is the configured one, or else the datacenter of
/// the first host seen at `init`. At most `used_hosts_per_remote_dc` hosts
/// of every other datacenter are `REMOTE`; the rest are `IGNORED`.
#[derive(Debug)]
pub struct DcAwareRoundRobinPolicy {
    configured_dc: Option<String>,
    local_dc: OnceLock<Option<String>>,
    used_hosts_per_remote_dc: usize,
    registry: RegistryBinding,
    index: AtomicUsize,
    partition: RwLock<Option<Arc<DcPartition>>>,
}

impl Default for DcAwareRoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DcAwareRoundRobinPolicy {
    /// Infers the local datacenter from the first host at `init`.
    pub fn new() -> Self {
        Self {
            configured_dc: None,
            local_dc: OnceLock::new(),
            used_hosts_per_remote_dc: DEFAULT_USED_HOSTS_PER_REMOTE_DC,
            registry: RegistryBinding::default(),
            index: AtomicUsize::new(0),
            partition: RwLock::new(None),
        }
    }

    /// Uses `local_dc` as the local datacenter.
    pub fn with_local_dc(local_dc: impl Into<String>) -> Self {
        Self {
            configured_dc: Some(local_dc.into()),
            ..Self::new()
        }
    }

    /// Number of hosts per remote datacenter eligible as fallback.
    pub fn used_hosts_per_remote_dc(mut self, count: usize) -> Self {
        self.used_hosts_per_remote_dc = count;
        self
    }

    /// The resolved local datacenter, once initialized.
    pub fn local_dc(&self) -> Option<&str> {
        self.local_dc.get().and_then(|dc| dc.as_deref())
    }

    fn is_local(&self, host: &Host) -> bool {
        match self.local_dc() {
            Some(dc) => host.datacenter() == Some(dc),
            None => true,
        }
    }

    fn partition(&self, registry: &HostRegistry) -> Arc<DcPartition> {
        let topology = registry.snapshot();
        if let Some(cached) = self
            .partition
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if cached.version == topology.version() {
                return Arc::clone(cached);
            }
        }

        let mut local = Vec::new();
        let mut remote_by_dc: BTreeMap<&str, Vec<Arc<Host>>> = BTreeMap::new();
        for host in topology.hosts() {
            if self.is_local(host) {
                local.push(Arc::clone(host));
            } else {
                let dc = host.datacenter().unwrap_or_default();
                let hosts = remote_by_dc.entry(dc).or_default();
                if hosts.len() < self.used_hosts_per_remote_dc {
                    hosts.push(Arc::clone(host));
                }
            }
        }
        let remote: Vec<Arc<Host>> = remote_by_dc.into_values().flatten().collect();
        let partition = Arc::new(DcPartition {
            version: topology.version(),
            remote_addresses: remote.iter().map(|h| h.address()).collect(),
            local: local.into(),
            remote: remote.into(),
        });
        *self
            .partition
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&partition));
        partition
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn init(&self, registry: Arc<HostRegistry>) -> Result<()> {
        let resolved = self.local_dc.get_or_init(|| {
            self.configured_dc.clone().or_else(|| {
                registry
                    .snapshot()
                    .hosts()
                    .iter()
                    .find_map(|h| h.datacenter().map(str::to_string))
            })
        });
        match (&self.configured_dc, resolved) {
            (None, Some(dc)) => tracing::info!(local_dc = %dc, "inferred local datacenter"),
            (Some(dc), _) => {
                let topology = registry.snapshot();
                let has_hosts = topology
                    .hosts()
                    .iter()
                    .any(|h| h.datacenter() == Some(dc.as_str()));
                if !topology.is_empty() && !has_hosts {
                    tracing::warn!(local_dc = %dc, "configured local datacenter has no hosts");
                }
            }
            (None, None) => {}
        }
        self.registry.bind(registry)
    }

    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_local(host) {
            return HostDistance::Local;
        }
        let Some(registry) = self.registry.get() else {
            return HostDistance::Ignored;
        };
        if self.partition(registry).remote_addresses.contains(&host.address()) {
            HostDistance::Remote
        } else {
            HostDistance::Ignored
        }
    }

    fn new_query_plan(&self, _keyspace: Option<&str>, _options: &ExecutionOptions) -> QueryPlan {
        let Some(registry) = self.registry.get() else {
            return empty_plan();
        };
        let partition = self.partition(registry);
        let index = self.index.fetch_add(1, Ordering::Relaxed);

        let local = Arc::clone(&partition.local);
        let remote = Arc::clone(&partition.remote);
        let local_start = if local.is_empty() { 0 } else { index % local.len() };
        let remote_start = if remote.is_empty() { 0 } else { index % remote.len() };

        Box::new(
            rotation(local, local_start)
                .chain(rotation(remote, remote_start))
                .filter(|h| h.is_up()),
        )
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([
            ("localDataCenter", self.local_dc().unwrap_or_default().to_string()),
            (
                "usedHostsPerRemoteDc",
                self.used_hosts_per_remote_dc.to_string(),
            ),
        ])
    }
}
