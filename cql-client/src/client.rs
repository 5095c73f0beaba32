//! Client entry point.

use std::sync::Arc;

use cql_core::Result;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cluster::{Host, HostRegistry, ReconnectionSupervisor, TopologyUpdate};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, RequestSlots, Transport};
use crate::execution::{ExecutionOptions, RequestHandler, ResultSet, Statement};

/// Executes statements against a cluster through a connection layer.
///
/// `Client` owns the host registry, the background reconnection supervisor
/// and the request orchestrator. The connection layer is supplied as a
/// [`Transport`] and reports reachability changes through
/// [`handle_connection_event`](Client::handle_connection_event).
///
/// # Example
///
/// ```ignore
/// use cql_client::{Client, ClientConfig};
///
/// let config = ClientConfig::builder()
///     .add_contact_point("10.0.0.1".parse()?)
///     .local_datacenter("dc1")
///     .build()?;
/// let client = Client::connect(config, transport).await?;
///
/// let rows = client.execute("SELECT * FROM users", None).await?;
/// client.shutdown().await;
/// ```
#[derive(Debug)]
pub struct Client {
    config: Arc<ClientConfig>,
    registry: Arc<HostRegistry>,
    transport: Arc<dyn Transport>,
    slots: Arc<RequestSlots>,
    handler: RequestHandler,
    supervisor: ReconnectionSupervisor,
}

impl Client {
    /// Builds the host registry and starts serving requests.
    ///
    /// Contact points are registered first, then the topology reported by
    /// the transport is applied through the address translator. A topology
    /// fetch failure is logged and the contact points are used as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the load balancing policy cannot be bound to the
    /// new registry.
    #[instrument(
        name = "client.connect",
        skip_all,
        fields(contact_points = config.contact_points().len())
    )]
    pub async fn connect(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let registry = Arc::new(HostRegistry::new());
        for address in config.contact_addresses() {
            registry.add_host(Host::new(address));
        }

        let policies = config.policies().clone();
        match transport.fetch_topology().await {
            Ok(peers) => {
                let update = registry
                    .apply_topology(peers, policies.address_resolution.as_ref())
                    .await;
                log_topology_update(&update);
            }
            Err(e) => {
                tracing::warn!(error = %e, "topology fetch failed, using contact points");
            }
        }

        policies.load_balancing.init(Arc::clone(&registry))?;
        // Weak: the policy already holds the registry.
        let load_balancing = Arc::downgrade(&policies.load_balancing);
        registry.set_distance_classifier(Arc::new(move |host: &Host| {
            load_balancing
                .upgrade()
                .map_or(host.distance(), |policy| policy.distance(host))
        }));

        let supervisor = ReconnectionSupervisor::start(
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&policies.reconnection),
        );
        let slots = Arc::new(RequestSlots::new(config.pooling().clone()));
        let metrics = Arc::clone(config.metrics());
        let handler = RequestHandler::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            policies,
            Arc::clone(&slots),
            Arc::clone(&metrics),
        );

        let hosts = registry.len();
        metrics.set_hosts_up(up_count(&registry));
        tracing::info!(
            hosts,
            local_datacenter = config.local_datacenter().unwrap_or_default(),
            "client connected"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            transport,
            slots,
            handler,
            supervisor,
        })
    }

    /// Executes a statement. Without explicit options, the configured query
    /// defaults apply.
    pub async fn execute(
        &self,
        statement: impl Into<Statement>,
        options: Option<ExecutionOptions>,
    ) -> Result<ResultSet> {
        let options = options.unwrap_or_else(|| self.config.query().to_execution_options());
        self.handler.execute(statement.into(), options).await
    }

    /// Like [`execute`](Self::execute), also stopping when `cancel` fires.
    pub async fn execute_with_cancellation(
        &self,
        statement: impl Into<Statement>,
        options: Option<ExecutionOptions>,
        cancel: CancellationToken,
    ) -> Result<ResultSet> {
        let options = options.unwrap_or_else(|| self.config.query().to_execution_options());
        self.handler
            .execute_with_cancellation(statement.into(), options, cancel)
            .await
    }

    /// Applies a reachability change reported by the connection layer.
    pub fn handle_connection_event(&self, event: ConnectionEvent) {
        tracing::debug!(event = ?event, "connection event");
        self.registry.apply_connection_event(&event);
        if let ConnectionEvent::HostRemoved { address } = &event {
            self.slots.remove(address);
        }
        self.config.metrics().set_hosts_up(up_count(&self.registry));
    }

    /// Fetches the topology again and reconciles the registry with it.
    ///
    /// The registry reclassifies hosts through the load balancing policy;
    /// removed hosts lose their admission state.
    pub async fn refresh_topology(&self) -> Result<TopologyUpdate> {
        let policies = self.config.policies();
        let peers = self.transport.fetch_topology().await?;
        let update = self
            .registry
            .apply_topology(peers, policies.address_resolution.as_ref())
            .await;
        log_topology_update(&update);

        for address in &update.removed {
            self.slots.remove(address);
        }
        self.config.metrics().set_hosts_up(up_count(&self.registry));
        Ok(update)
    }

    /// Every known host, in registry order.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.registry.snapshot().hosts().to_vec()
    }

    /// The host registry.
    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stops background reconnection. In-flight requests are unaffected.
    pub async fn shutdown(&self) {
        tracing::info!(hosts = self.registry.len(), "shutting down client");
        self.supervisor.shutdown().await;
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.supervisor.is_shutdown()
    }
}

fn up_count(registry: &HostRegistry) -> usize {
    registry
        .snapshot()
        .hosts()
        .iter()
        .filter(|h| h.is_up())
        .count()
}

fn log_topology_update(update: &TopologyUpdate) {
    if update.added.is_empty() && update.removed.is_empty() && update.failed.is_empty() {
        return;
    }
    tracing::info!(
        added = update.added.len(),
        removed = update.removed.len(),
        failed = update.failed.len(),
        "topology applied"
    );
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use cql_core::DriverError;

    use super::*;
    use crate::cluster::{HostDistance, HostInfo, HostState};
    use crate::execution::Request;

    #[derive(Debug)]
    struct StaticTransport {
        peers: Vec<HostInfo>,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(&self, _host: &Host, _request: &Request) -> Result<ResultSet> {
            Ok(ResultSet::empty())
        }

        async fn connect(&self, _host: &Host) -> Result<()> {
            Err(DriverError::Connection("unreachable".into()))
        }

        async fn fetch_topology(&self) -> Result<Vec<HostInfo>> {
            Ok(self.peers.clone())
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .add_contact_point("10.0.0.1".parse().unwrap())
            .local_datacenter("dc1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Client>();
    }

    #[tokio::test]
    async fn test_connect_applies_topology_and_distances() {
        let transport = Arc::new(StaticTransport {
            peers: vec![
                HostInfo::new("10.0.0.1".parse().unwrap(), 9042).with_datacenter("dc1"),
                HostInfo::new("10.0.0.2".parse().unwrap(), 9042).with_datacenter("dc2"),
            ],
        });
        let client = Client::connect(config(), transport).await.unwrap();
        let hosts = client.hosts();
        assert_eq!(hosts.len(), 2);

        let local: SocketAddr = "10.0.0.1:9042".parse().unwrap();
        let remote: SocketAddr = "10.0.0.2:9042".parse().unwrap();
        let registry = client.registry();
        assert_eq!(registry.get(&local).unwrap().datacenter(), Some("dc1"));
        assert_eq!(registry.get(&local).unwrap().distance(), HostDistance::Local);
        assert_eq!(registry.get(&remote).unwrap().distance(), HostDistance::Ignored);
        client.shutdown().await;
        assert!(client.is_shutdown());
    }

    #[tokio::test]
    async fn test_host_removed_event() {
        let transport = Arc::new(StaticTransport { peers: Vec::new() });
        let client = Client::connect(config(), transport).await.unwrap();
        let address: SocketAddr = "10.0.0.1:9042".parse().unwrap();
        assert_eq!(client.hosts()[0].state(), HostState::Up);

        client.handle_connection_event(ConnectionEvent::HostRemoved { address });
        assert!(client.hosts().is_empty());
        let err = client.execute("SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, DriverError::NoHostAvailable { .. }));
        client.shutdown().await;
    }
}
