//! Contracts with the connection layer: request transport, host events and
//! per-host admission control.

mod pool;

use std::net::SocketAddr;

use async_trait::async_trait;
use cql_core::Result;

use crate::cluster::{Host, HostInfo};
use crate::execution::{Request, ResultSet};

pub use pool::{RequestSlot, RequestSlots};

/// Events reported by the connection layer about host reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connections to the host were (re)established.
    HostUp {
        /// The host address.
        address: SocketAddr,
    },
    /// The host became unreachable.
    HostDown {
        /// The host address.
        address: SocketAddr,
        /// The error that caused the disconnection.
        error: String,
    },
    /// The cluster no longer reports the host.
    HostRemoved {
        /// The host address.
        address: SocketAddr,
    },
}

/// Sends requests over established connections.
///
/// Frame encoding, socket I/O, TLS and authentication exchanges live
/// behind this trait. Responses are correlated per request by the
/// implementation.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends one attempt to `host` and waits for its response.
    async fn send(&self, host: &Host, request: &Request) -> Result<ResultSet>;

    /// Opens (or checks) a connection to `host`. Used to probe a host
    /// during reconnection.
    async fn connect(&self, host: &Host) -> Result<()>;

    /// Returns the hosts currently reported by the cluster, before address
    /// translation. An empty list means the topology is unknown.
    async fn fetch_topology(&self) -> Result<Vec<HostInfo>> {
        Ok(Vec::new())
    }
}
