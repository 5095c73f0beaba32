//! The host registry: single owner of every [`Host`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use cql_core::Token;
use tokio::sync::broadcast;

use super::host::{Host, HostDistance, HostInfo, HostState};
use super::token_ring::TokenRing;
use crate::connection::ConnectionEvent;
use crate::policies::address_resolution::AddressTranslator;

const DEFAULT_REPLICATION_FACTOR: usize = 1;

/// Changes applied by the registry, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A host joined the registry.
    Added(SocketAddr),
    /// A host left the registry. Terminal for that host.
    Removed(SocketAddr),
    /// A host became reachable.
    Up(SocketAddr),
    /// A host became unreachable.
    Down {
        /// The host address.
        address: SocketAddr,
        /// Why the host went down.
        reason: String,
    },
    /// A reconnection series started for a host.
    Reconnecting(SocketAddr),
}

/// Immutable view of the registry at one topology version.
#[derive(Debug)]
pub struct Topology {
    version: u64,
    hosts: HashMap<SocketAddr, Arc<Host>>,
    ordered: Arc<[Arc<Host>]>,
    ring: TokenRing,
}

impl Default for Topology {
    fn default() -> Self {
        Self::build(0, HashMap::new())
    }
}

impl Topology {
    fn build(version: u64, hosts: HashMap<SocketAddr, Arc<Host>>) -> Self {
        let mut ordered: Vec<Arc<Host>> = hosts.values().cloned().collect();
        ordered.sort_by_key(|h| h.address());
        let ring = TokenRing::build(&ordered);
        Self {
            version,
            hosts,
            ordered: ordered.into(),
            ring,
        }
    }

    /// Topology version; increases on every add or remove.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Hosts sorted by address.
    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.ordered
    }

    /// Shared handle on the sorted hosts, for plans that outlive the borrow.
    pub fn shared_hosts(&self) -> Arc<[Arc<Host>]> {
        Arc::clone(&self.ordered)
    }

    /// Looks up a host by address.
    pub fn get(&self, address: &SocketAddr) -> Option<&Arc<Host>> {
        self.hosts.get(address)
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns true if the registry holds no host.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Token ownership derived from the hosts' tokens.
    pub fn ring(&self) -> &TokenRing {
        &self.ring
    }
}

/// Outcome of [`HostRegistry::apply_topology`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    /// Hosts added.
    pub added: Vec<SocketAddr>,
    /// Hosts removed.
    pub removed: Vec<SocketAddr>,
    /// Advertised addresses whose translation failed.
    pub failed: Vec<SocketAddr>,
}

/// Classifies a host for load balancing.
pub type DistanceClassifier = Arc<dyn Fn(&Host) -> HostDistance + Send + Sync>;

/// Mapping from host address to [`Host`], shared by all in-flight requests.
///
/// Reads go through copy-on-write snapshots so a query plan never observes
/// a half-applied change. State changes go through compare-and-swap
/// transitions on the host itself. When a distance classifier is bound,
/// every host's distance is recomputed after each topology change.
pub struct HostRegistry {
    topology: RwLock<Arc<Topology>>,
    version: AtomicU64,
    replication: RwLock<HashMap<String, usize>>,
    translations: RwLock<HashMap<SocketAddr, SocketAddr>>,
    classifier: RwLock<Option<DistanceClassifier>>,
    events: broadcast::Sender<HostEvent>,
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classified = self
            .classifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("HostRegistry")
            .field("topology", &self.snapshot())
            .field("replication", &self.replication)
            .field("classified", &classified)
            .finish_non_exhaustive()
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            topology: RwLock::new(Arc::new(Topology::default())),
            version: AtomicU64::new(0),
            replication: RwLock::new(HashMap::new()),
            translations: RwLock::new(HashMap::new()),
            classifier: RwLock::new(None),
            events,
        }
    }

    /// Subscribes to host events.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Returns a consistent snapshot of all hosts.
    pub fn snapshot(&self) -> Arc<Topology> {
        let guard = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Returns the current topology version.
    pub fn topology_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Looks up a host by address.
    pub fn get(&self, address: &SocketAddr) -> Option<Arc<Host>> {
        self.snapshot().get(address).cloned()
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns true if the registry holds no host.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut HashMap<SocketAddr, Arc<Host>>) -> bool,
    {
        let mut guard = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        let mut hosts = guard.hosts.clone();
        if !f(&mut hosts) {
            return false;
        }
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        *guard = Arc::new(Topology::build(version, hosts));
        true
    }

    /// Adds a host; returns the registered instance, which is the existing
    /// one when the address is already known.
    pub fn add_host(&self, host: Host) -> Arc<Host> {
        let address = host.address();
        let host = Arc::new(host);
        let mut registered = Arc::clone(&host);
        let added = self.mutate(|hosts| match hosts.get(&address) {
            Some(existing) => {
                registered = Arc::clone(existing);
                false
            }
            None => {
                hosts.insert(address, host);
                true
            }
        });
        if added {
            tracing::info!(address = %address, "host added");
            self.reclassify();
            let _ = self.events.send(HostEvent::Added(address));
        }
        registered
    }

    /// Removes a host. The host moves to `REMOVED` and its entry is deleted.
    pub fn remove_host(&self, address: &SocketAddr) -> Option<Arc<Host>> {
        let mut removed = None;
        self.mutate(|hosts| {
            removed = hosts.remove(address);
            removed.is_some()
        });
        let host = removed?;
        host.transition(
            &[HostState::Up, HostState::Down, HostState::Reconnecting],
            HostState::Removed,
        );
        self.translations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, translated| *translated != *address);
        tracing::info!(address = %address, "host removed");
        self.reclassify();
        let _ = self.events.send(HostEvent::Removed(*address));
        Some(host)
    }

    /// `UP`/`RECONNECTING` → `DOWN`. Returns whether the state changed.
    pub fn mark_down(&self, address: &SocketAddr, reason: &str) -> bool {
        let Some(host) = self.get(address) else {
            return false;
        };
        match host.transition(&[HostState::Up, HostState::Reconnecting], HostState::Down) {
            Some(previous) => {
                tracing::info!(address = %address, previous = %previous, reason, "host down");
                let _ = self.events.send(HostEvent::Down {
                    address: *address,
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// `DOWN` → `RECONNECTING`. Returns whether the state changed.
    pub fn start_reconnecting(&self, address: &SocketAddr) -> bool {
        let Some(host) = self.get(address) else {
            return false;
        };
        if host
            .transition(&[HostState::Down], HostState::Reconnecting)
            .is_some()
        {
            tracing::debug!(address = %address, "host reconnecting");
            let _ = self.events.send(HostEvent::Reconnecting(*address));
            true
        } else {
            false
        }
    }

    /// `DOWN`/`RECONNECTING` → `UP`. Returns whether the state changed.
    pub fn mark_up(&self, address: &SocketAddr) -> bool {
        let Some(host) = self.get(address) else {
            return false;
        };
        if host
            .transition(&[HostState::Down, HostState::Reconnecting], HostState::Up)
            .is_some()
        {
            tracing::info!(address = %address, "host up");
            let _ = self.events.send(HostEvent::Up(*address));
            true
        } else {
            false
        }
    }

    /// Applies an event reported by the connection layer.
    pub fn apply_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::HostUp { address } => {
                self.mark_up(address);
            }
            ConnectionEvent::HostDown { address, error } => {
                self.mark_down(address, error);
            }
            ConnectionEvent::HostRemoved { address } => {
                self.remove_host(address);
            }
        }
    }

    /// Reconciles the registry with the hosts reported by the cluster.
    ///
    /// Each advertised address is translated; a translation failure skips
    /// adding that host but keeps it if it is already registered. Hosts
    /// absent from a non-empty report are removed.
    pub async fn apply_topology(
        &self,
        peers: Vec<HostInfo>,
        translator: &dyn AddressTranslator,
    ) -> TopologyUpdate {
        let mut update = TopologyUpdate::default();
        if peers.is_empty() {
            return update;
        }

        let mut reported = HashSet::with_capacity(peers.len());
        for info in peers {
            let advertised = SocketAddr::new(info.address, info.port);
            match translator.translate(info.address, info.port).await {
                Ok(address) => {
                    reported.insert(address);
                    self.translations
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(advertised, address);
                    match self.get(&address) {
                        None => {
                            self.add_host(Host::from_info(address, info));
                            update.added.push(address);
                        }
                        Some(existing) => self.adopt_metadata(&existing, info),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        address = %advertised,
                        error = %e,
                        "address translation failed, host skipped"
                    );
                    if let Some(known) = self.last_translation(&advertised) {
                        reported.insert(known);
                    }
                    update.failed.push(advertised);
                }
            }
        }

        let stale: Vec<SocketAddr> = self
            .snapshot()
            .hosts()
            .iter()
            .map(|h| h.address())
            .filter(|a| !reported.contains(a))
            .collect();
        for address in stale {
            if self.remove_host(&address).is_some() {
                update.removed.push(address);
            }
        }
        update
    }

    /// Sets reported metadata on a contact point in place, then rebuilds
    /// the topology so the token ring and distances see it.
    fn adopt_metadata(&self, existing: &Arc<Host>, info: HostInfo) {
        if !existing.adopt_metadata(info) {
            return;
        }
        let address = existing.address();
        let rebuilt = self.mutate(|hosts| {
            hosts
                .get(&address)
                .is_some_and(|current| Arc::ptr_eq(current, existing))
        });
        if rebuilt {
            tracing::debug!(address = %address, "contact point metadata updated");
            self.reclassify();
        }
    }

    /// The registered address an advertised address last translated to.
    /// Falls back to the advertised address itself when it is registered.
    fn last_translation(&self, advertised: &SocketAddr) -> Option<SocketAddr> {
        let known = self
            .translations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(advertised)
            .copied();
        known
            .or(Some(*advertised))
            .filter(|address| self.get(address).is_some())
    }

    /// Stores `classify(host)` as the distance of every host.
    pub fn refresh_distances<F>(&self, classify: F)
    where
        F: Fn(&Host) -> HostDistance,
    {
        for host in self.snapshot().hosts() {
            host.set_distance(classify(host));
        }
    }

    /// Binds the classifier applied after every topology change and
    /// applies it once to the current hosts.
    pub fn set_distance_classifier(&self, classifier: DistanceClassifier) {
        *self
            .classifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(classifier);
        self.reclassify();
    }

    fn reclassify(&self) {
        let classifier = self
            .classifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(classifier) = classifier {
            self.refresh_distances(|host| classifier(host));
        }
    }

    /// Sets the replication factor used for token-aware routing.
    pub fn set_replication_factor(&self, keyspace: impl Into<String>, factor: usize) {
        self.replication
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(keyspace.into(), factor);
    }

    /// Replication factor of `keyspace`, defaulting to 1.
    pub fn replication_factor(&self, keyspace: Option<&str>) -> usize {
        keyspace
            .and_then(|ks| {
                self.replication
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(ks)
                    .copied()
            })
            .unwrap_or(DEFAULT_REPLICATION_FACTOR)
    }

    /// Replica hosts owning `token` in `keyspace`, in ring order.
    pub fn replicas(&self, keyspace: Option<&str>, token: Token) -> Vec<Arc<Host>> {
        let topology = self.snapshot();
        let factor = self.replication_factor(keyspace);
        topology
            .ring()
            .replicas(token, factor)
            .into_iter()
            .filter_map(|a| topology.get(&a).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::address_resolution::{IdentityTranslator, StaticMappingTranslator};
    use std::net::IpAddr;

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:9042", n).parse().unwrap()
    }

    #[test]
    fn test_add_is_idempotent_and_bumps_version() {
        let registry = HostRegistry::new();
        let first = registry.add_host(Host::new(addr(1)));
        let v = registry.topology_version();
        let again = registry.add_host(Host::new(addr(1)));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.topology_version(), v);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_state_machine_transitions() {
        let registry = HostRegistry::new();
        let host = registry.add_host(Host::new(addr(1)));

        assert!(!registry.start_reconnecting(&addr(1)));
        assert!(registry.mark_down(&addr(1), "reset"));
        assert!(!registry.mark_down(&addr(1), "reset"));
        assert!(registry.start_reconnecting(&addr(1)));
        assert_eq!(host.state(), HostState::Reconnecting);
        assert!(registry.mark_down(&addr(1), "exhausted"));
        assert!(registry.start_reconnecting(&addr(1)));
        assert!(registry.mark_up(&addr(1)));
        assert!(host.is_up());
    }

    #[test]
    fn test_remove_is_terminal() {
        let registry = HostRegistry::new();
        let host = registry.add_host(Host::new(addr(1)));
        registry.remove_host(&addr(1)).unwrap();
        assert_eq!(host.state(), HostState::Removed);
        assert!(registry.get(&addr(1)).is_none());
        assert!(!registry.mark_up(&addr(1)));
        assert_eq!(host.state(), HostState::Removed);
    }

    #[test]
    fn test_snapshot_is_not_torn_by_later_changes() {
        let registry = HostRegistry::new();
        registry.add_host(Host::new(addr(1)));
        let before = registry.snapshot();
        registry.add_host(Host::new(addr(2)));
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.snapshot().version() > before.version());
    }

    #[test]
    fn test_connection_events_drive_state() {
        let registry = HostRegistry::new();
        let mut events = registry.subscribe();
        registry.add_host(Host::new(addr(1)));
        registry.apply_connection_event(&ConnectionEvent::HostDown {
            address: addr(1),
            error: "closed".into(),
        });
        registry.apply_connection_event(&ConnectionEvent::HostUp { address: addr(1) });
        registry.apply_connection_event(&ConnectionEvent::HostRemoved { address: addr(1) });

        assert_eq!(events.try_recv().unwrap(), HostEvent::Added(addr(1)));
        assert!(matches!(events.try_recv().unwrap(), HostEvent::Down { .. }));
        assert_eq!(events.try_recv().unwrap(), HostEvent::Up(addr(1)));
        assert_eq!(events.try_recv().unwrap(), HostEvent::Removed(addr(1)));
    }

    #[tokio::test]
    async fn test_apply_topology_adds_and_removes() {
        let registry = HostRegistry::new();
        registry.add_host(Host::new(addr(9)));
        let peers = vec![
            HostInfo::new("10.0.0.1".parse().unwrap(), 9042),
            HostInfo::new("10.0.0.2".parse().unwrap(), 9042),
        ];
        let update = registry.apply_topology(peers, &IdentityTranslator).await;
        assert_eq!(update.added, vec![addr(1), addr(2)]);
        assert_eq!(update.removed, vec![addr(9)]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_translation_failure_skips_only_that_host() {
        let registry = HostRegistry::new();
        let known: IpAddr = "10.0.0.1".parse().unwrap();
        let translator = StaticMappingTranslator::default()
            .with_mapping(known, "192.0.2.1:9042".parse().unwrap())
            .strict();
        let peers = vec![
            HostInfo::new(known, 9042),
            HostInfo::new("10.0.0.2".parse().unwrap(), 9042),
        ];
        let update = registry.apply_topology(peers, &translator).await;
        assert_eq!(update.added.len(), 1);
        assert_eq!(update.failed, vec![addr(2)]);
        assert!(registry.get(&"192.0.2.1:9042".parse().unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_contact_point_adopts_reported_metadata() {
        let registry = HostRegistry::new();
        registry.add_host(Host::new(addr(1)));
        registry.mark_down(&addr(1), "refused");
        let peers = vec![HostInfo::new("10.0.0.1".parse().unwrap(), 9042)
            .with_datacenter("dc1")
            .with_tokens(vec![Token(42)])];

        let update = registry.apply_topology(peers, &IdentityTranslator).await;

        assert!(update.added.is_empty());
        let host = registry.get(&addr(1)).unwrap();
        assert_eq!(host.datacenter(), Some("dc1"));
        assert_eq!(host.state(), HostState::Down);
        assert_eq!(registry.snapshot().ring().replicas(Token(0), 1), vec![addr(1)]);
    }

    #[tokio::test]
    async fn test_contact_point_metadata_is_set_in_place() {
        let registry = HostRegistry::new();
        let held = registry.add_host(Host::new(addr(1)));
        let version = registry.topology_version();
        let peers = vec![HostInfo::new("10.0.0.1".parse().unwrap(), 9042).with_datacenter("dc1")];

        registry.apply_topology(peers, &IdentityTranslator).await;
        registry.mark_down(&addr(1), "reset");

        let current = registry.get(&addr(1)).unwrap();
        assert!(Arc::ptr_eq(&held, &current));
        assert_eq!(held.state(), HostState::Down);
        assert_eq!(held.datacenter(), Some("dc1"));
        assert!(registry.topology_version() > version);
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_registered_host() {
        let registry = HostRegistry::new();
        let advertised: IpAddr = "10.0.0.1".parse().unwrap();
        let public: SocketAddr = "192.0.2.1:9042".parse().unwrap();
        let mapped = StaticMappingTranslator::default()
            .with_mapping(advertised, public)
            .strict();
        registry
            .apply_topology(vec![HostInfo::new(advertised, 9042)], &mapped)
            .await;
        let mut events = registry.subscribe();

        let unmapped = StaticMappingTranslator::default().strict();
        let peers = vec![
            HostInfo::new(advertised, 9042),
            HostInfo::new("10.0.0.2".parse().unwrap(), 9042),
        ];
        let update = registry.apply_topology(peers, &unmapped).await;

        assert_eq!(update.failed, vec![addr(1), addr(2)]);
        assert!(update.removed.is_empty());
        assert_eq!(registry.get(&public).unwrap().state(), HostState::Up);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_classifier_runs_after_add_and_remove() {
        let registry = HostRegistry::new();
        registry.add_host(Host::new(addr(1)));
        registry.add_host(Host::new(addr(2)));
        // Only the lowest address is LOCAL.
        let classify = |registry: &HostRegistry, host: &Host| {
            let lowest = registry.snapshot().hosts().first().map(|h| h.address());
            if lowest == Some(host.address()) {
                HostDistance::Local
            } else {
                HostDistance::Ignored
            }
        };
        let registry = Arc::new(registry);
        let weak = Arc::downgrade(&registry);
        registry.set_distance_classifier(Arc::new(move |host: &Host| {
            weak.upgrade()
                .map_or(HostDistance::Ignored, |r| classify(&r, host))
        }));
        let second = registry.get(&addr(2)).unwrap();
        assert_eq!(second.distance(), HostDistance::Ignored);

        registry.remove_host(&addr(1));
        assert_eq!(second.distance(), HostDistance::Local);

        let first = registry.add_host(Host::new(addr(1)));
        assert_eq!(first.distance(), HostDistance::Local);
        assert_eq!(second.distance(), HostDistance::Ignored);
    }

    #[tokio::test]
    async fn test_empty_topology_report_is_ignored() {
        let registry = HostRegistry::new();
        registry.add_host(Host::new(addr(1)));
        let update = registry.apply_topology(Vec::new(), &IdentityTranslator).await;
        assert_eq!(update, TopologyUpdate::default());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replicas_use_keyspace_replication_factor() {
        let registry = HostRegistry::new();
        for (n, token) in [(1u8, -10i64), (2, 0), (3, 10)] {
            let info = HostInfo::new(format!("10.0.0.{}", n).parse().unwrap(), 9042)
                .with_tokens(vec![Token(token)]);
            registry.add_host(Host::from_info(addr(n), info));
        }
        registry.set_replication_factor("ks", 2);
        let replicas: Vec<_> = registry
            .replicas(Some("ks"), Token(-5))
            .iter()
            .map(|h| h.address())
            .collect();
        assert_eq!(replicas, vec![addr(2), addr(3)]);
        assert_eq!(registry.replicas(None, Token(-5)).len(), 1);
    }

    #[test]
    fn test_refresh_distances() {
        let registry = HostRegistry::new();
        let host = registry.add_host(Host::new(addr(1)));
        registry.refresh_distances(|_| HostDistance::Ignored);
        assert_eq!(host.distance(), HostDistance::Ignored);
    }
}
