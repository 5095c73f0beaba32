//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cql_client::{
    ClientConfig, ColumnSet, CqlValue, DriverError, Host, HostInfo, HostRegistry, Policies,
    Request, Result, ResultSet, Row,
};
use tokio::time::Instant;

pub type Responder = Arc<dyn Fn(&Request) -> Result<ResultSet> + Send + Sync>;

/// One attempt observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub address: SocketAddr,
    pub execution_index: u32,
    pub at: Duration,
}

struct Script {
    delay: Duration,
    responder: Responder,
}

/// Scripted connection layer: every host answers after a fixed delay with
/// the output of its responder. Unscripted hosts answer immediately with
/// one row naming the host.
pub struct MockTransport {
    started: Instant,
    scripts: Mutex<HashMap<SocketAddr, Script>>,
    sent: Mutex<Vec<Sent>>,
    peers: Vec<HostInfo>,
    refused_probes: AtomicUsize,
    probes: AtomicUsize,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_peers(Vec::new())
    }

    pub fn with_peers(peers: Vec<HostInfo>) -> Self {
        Self {
            started: Instant::now(),
            scripts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            peers,
            refused_probes: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Makes `address` answer after `delay` with `responder`.
    pub fn script<F>(&self, address: SocketAddr, delay: Duration, responder: F)
    where
        F: Fn(&Request) -> Result<ResultSet> + Send + Sync + 'static,
    {
        self.scripts.lock().unwrap().insert(
            address,
            Script {
                delay,
                responder: Arc::new(responder),
            },
        );
    }

    /// Makes `address` answer successfully after `delay`.
    pub fn slow(&self, address: SocketAddr, delay: Duration) {
        self.script(address, delay, move |_| Ok(host_rows(address)));
    }

    /// Makes `address` always fail with `error`.
    pub fn failing(&self, address: SocketAddr, error: fn() -> DriverError) {
        self.script(address, Duration::ZERO, move |_| Err(error()));
    }

    /// Refuses the next `count` reconnection probes.
    pub fn refuse_probes(&self, count: usize) {
        self.refused_probes.store(count, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_addresses(&self) -> Vec<SocketAddr> {
        self.sent().into_iter().map(|s| s.address).collect()
    }
}

#[async_trait]
impl cql_client::Transport for MockTransport {
    async fn send(&self, host: &Host, request: &Request) -> Result<ResultSet> {
        let address = host.address();
        self.sent.lock().unwrap().push(Sent {
            address,
            execution_index: request.execution_index(),
            at: self.started.elapsed(),
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&address)
            .map(|s| (s.delay, Arc::clone(&s.responder)));
        match script {
            Some((delay, responder)) => {
                tokio::time::sleep(delay).await;
                responder(request)
            }
            None => Ok(host_rows(address)),
        }
    }

    async fn connect(&self, _host: &Host) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refused_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match refused {
            Ok(_) => Err(DriverError::Connection("connection refused".into())),
            Err(_) => Ok(()),
        }
    }

    async fn fetch_topology(&self) -> Result<Vec<HostInfo>> {
        Ok(self.peers.clone())
    }
}

pub fn addr(n: u8) -> SocketAddr {
    format!("10.0.0.{}:9042", n).parse().unwrap()
}

pub fn host_info(n: u8, datacenter: &str) -> HostInfo {
    HostInfo::new(addr(n).ip(), 9042).with_datacenter(datacenter)
}

/// A single-row result whose `host` column names the host that served it.
pub fn host_rows(address: SocketAddr) -> ResultSet {
    let columns = Arc::new(ColumnSet::from_names(["host"]));
    let row = Row::with_values(Arc::clone(&columns), vec![CqlValue::from(address.to_string())])
        .unwrap();
    ResultSet::new(columns, vec![row])
}

pub fn registry_with(hosts: impl IntoIterator<Item = HostInfo>) -> Arc<HostRegistry> {
    let registry = Arc::new(HostRegistry::new());
    for info in hosts {
        let address = SocketAddr::new(info.address, info.port);
        registry.add_host(Host::from_info(address, info));
    }
    registry
}

/// A config whose only contact point is host 1, with the given policies.
pub fn config_with(policies: Policies) -> ClientConfig {
    ClientConfig::builder()
        .add_contact_point(addr(1).ip())
        .policies(policies)
        .build()
        .expect("failed to build config")
}
