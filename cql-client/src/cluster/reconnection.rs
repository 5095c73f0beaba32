//! Background reconnection of down hosts.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Host, HostDistance, HostEvent, HostRegistry, HostState};
use crate::connection::Transport;
use crate::policies::reconnection::ReconnectionPolicy;

/// Hosts whose schedule ran out; they stay `DOWN` until the connection
/// layer reports them up again.
type Exhausted = Arc<Mutex<HashSet<SocketAddr>>>;

/// Runs one reconnection series per down host.
///
/// Listens to the registry: a `DOWN` host that is not `IGNORED` gets a task
/// that walks a fresh schedule from the reconnection policy and probes the
/// host through the transport after every delay. A successful probe marks
/// the host up. Series are cancelled when the host comes back up by other
/// means, is removed, or the supervisor shuts down.
#[derive(Debug)]
pub struct ReconnectionSupervisor {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct Context {
    registry: Arc<HostRegistry>,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn ReconnectionPolicy>,
    exhausted: Exhausted,
}

impl ReconnectionSupervisor {
    /// Starts supervising `registry`. Hosts already down get a series
    /// immediately.
    pub fn start(
        registry: Arc<HostRegistry>,
        transport: Arc<dyn Transport>,
        policy: Arc<dyn ReconnectionPolicy>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let events = registry.subscribe();
        let context = Context {
            registry,
            transport,
            policy,
            exhausted: Arc::new(Mutex::new(HashSet::new())),
        };
        let handle = tokio::spawn(supervise(context, events, cancel.clone()));
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancels every running series and waits for the supervisor to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether the supervisor was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    context: Context,
    mut events: broadcast::Receiver<HostEvent>,
    cancel: CancellationToken,
) {
    let mut series: HashMap<SocketAddr, CancellationToken> = HashMap::new();
    resync(&context, &mut series, &cancel);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(HostEvent::Down { address, .. }) => {
                let exhausted = context
                    .exhausted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains(&address);
                if exhausted {
                    series.remove(&address);
                } else if let Some(host) = context.registry.get(&address) {
                    spawn_series(&context, &mut series, &cancel, host);
                }
            }
            Ok(HostEvent::Up(address)) | Ok(HostEvent::Removed(address)) => {
                if let Some(token) = series.remove(&address) {
                    token.cancel();
                }
                context
                    .exhausted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&address);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "host events lagged, resynchronizing reconnections");
                resync(&context, &mut series, &cancel);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("reconnection supervisor stopped");
}

fn resync(
    context: &Context,
    series: &mut HashMap<SocketAddr, CancellationToken>,
    cancel: &CancellationToken,
) {
    let topology = context.registry.snapshot();
    for host in topology.hosts() {
        if host.state() == HostState::Down {
            spawn_series(context, series, cancel, Arc::clone(host));
        }
    }
}

fn spawn_series(
    context: &Context,
    series: &mut HashMap<SocketAddr, CancellationToken>,
    cancel: &CancellationToken,
    host: Arc<Host>,
) {
    let address = host.address();
    if host.distance() == HostDistance::Ignored {
        tracing::debug!(address = %address, "not reconnecting to ignored host");
        return;
    }
    if series.get(&address).is_some_and(|t| !t.is_cancelled()) {
        return;
    }
    let token = cancel.child_token();
    series.insert(address, token.clone());
    let span = tracing::info_span!("reconnection.series", address = %address);
    tokio::spawn(reconnect_host(context.clone(), host, token).instrument(span));
}

async fn reconnect_host(context: Context, host: Arc<Host>, cancel: CancellationToken) {
    let address = host.address();
    context.registry.start_reconnecting(&address);
    let mut schedule = context.policy.new_schedule();
    let mut attempt = 0u32;

    loop {
        let Some(delay) = schedule.next() else {
            tracing::warn!(attempts = attempt, "reconnection schedule exhausted");
            context
                .exhausted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(address);
            context
                .registry
                .mark_down(&address, "reconnection schedule exhausted");
            return;
        };
        attempt += 1;
        tracing::debug!(attempt, delay = ?delay, "waiting before reconnection attempt");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if host.state() == HostState::Removed {
            return;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = context.transport.connect(&host) => result,
        };
        match result {
            Ok(()) => {
                tracing::info!(attempt, "reconnection successful");
                context.registry.mark_up(&address);
                return;
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "reconnection attempt failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use cql_core::{DriverError, Result};

    use super::*;
    use crate::execution::{Request, ResultSet};
    use crate::policies::reconnection::{ConstantReconnectionPolicy, Schedule};

    /// Refuses the first `failures` probes.
    #[derive(Debug)]
    struct FlakyTransport {
        failures: usize,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _host: &Host, _request: &Request) -> Result<ResultSet> {
            Ok(ResultSet::empty())
        }

        async fn connect(&self, _host: &Host) -> Result<()> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DriverError::Connection("refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct TwoAttempts;

    impl ReconnectionPolicy for TwoAttempts {
        fn new_schedule(&self) -> Schedule {
            Box::new(std::iter::repeat(Duration::from_millis(100)).take(2))
        }
    }

    fn setup(failures: usize) -> (Arc<HostRegistry>, Arc<FlakyTransport>, SocketAddr) {
        let registry = Arc::new(HostRegistry::new());
        let address: SocketAddr = "10.0.0.1:9042".parse().unwrap();
        registry.add_host(Host::new(address));
        let transport = Arc::new(FlakyTransport {
            failures,
            probes: AtomicUsize::new(0),
        });
        (registry, transport, address)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_host_is_reconnected() {
        let (registry, transport, address) = setup(2);
        let supervisor = ReconnectionSupervisor::start(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1))),
        );
        settle().await;

        registry.mark_down(&address, "connection reset");
        settle().await;
        assert_eq!(registry.get(&address).unwrap().state(), HostState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        settle().await;
        assert_eq!(registry.get(&address).unwrap().state(), HostState::Up);
        assert_eq!(transport.probes.load(Ordering::SeqCst), 3);

        supervisor.shutdown().await;
        assert!(supervisor.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_schedule_leaves_host_down() {
        let (registry, transport, address) = setup(usize::MAX);
        let supervisor =
            ReconnectionSupervisor::start(
                Arc::clone(&registry),
                transport.clone(),
                Arc::new(TwoAttempts),
            );
        settle().await;

        registry.mark_down(&address, "connection reset");
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(registry.get(&address).unwrap().state(), HostState::Down);
        assert_eq!(transport.probes.load(Ordering::SeqCst), 2);
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_host_stops_series() {
        let (registry, transport, address) = setup(usize::MAX);
        let supervisor = ReconnectionSupervisor::start(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1))),
        );
        settle().await;

        registry.mark_down(&address, "connection reset");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        registry.remove_host(&address);
        settle().await;
        let probes = transport.probes.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(transport.probes.load(Ordering::SeqCst), probes);
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_series() {
        let (registry, transport, address) = setup(usize::MAX);
        let supervisor = ReconnectionSupervisor::start(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1))),
        );
        settle().await;
        registry.mark_down(&address, "connection reset");
        settle().await;

        supervisor.shutdown().await;
        settle().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(transport.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_host_is_not_reconnected() {
        let (registry, transport, address) = setup(0);
        registry.refresh_distances(|_| HostDistance::Ignored);
        let supervisor = ReconnectionSupervisor::start(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1))),
        );
        settle().await;
        registry.mark_down(&address, "connection reset");
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(registry.get(&address).unwrap().state(), HostState::Down);
        assert_eq!(transport.probes.load(Ordering::SeqCst), 0);
        supervisor.shutdown().await;
    }
}
