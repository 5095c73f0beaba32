//! Cluster hosts and their reachability state.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use cql_core::Token;
use uuid::Uuid;

/// Reachability of a host as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostState {
    /// Connections are established; the host is eligible for query plans.
    Up = 0,
    /// The connection was lost and no reconnection series is running.
    Down = 1,
    /// A reconnection series is in progress.
    Reconnecting = 2,
    /// The topology no longer reports the host. Terminal.
    Removed = 3,
}

impl HostState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HostState::Up,
            1 => HostState::Down,
            2 => HostState::Reconnecting,
            _ => HostState::Removed,
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Up => "UP",
            HostState::Down => "DOWN",
            HostState::Reconnecting => "RECONNECTING",
            HostState::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Load-balancing classification of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HostDistance {
    /// Preferred host, usually in the local datacenter.
    Local = 0,
    /// Fallback host, usually in a remote datacenter.
    Remote = 1,
    /// Never used for requests and never reconnected to.
    Ignored = 2,
}

impl HostDistance {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HostDistance::Local,
            1 => HostDistance::Remote,
            _ => HostDistance::Ignored,
        }
    }
}

impl fmt::Display for HostDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostDistance::Local => "LOCAL",
            HostDistance::Remote => "REMOTE",
            HostDistance::Ignored => "IGNORED",
        };
        f.write_str(name)
    }
}

/// Host metadata reported by the topology collaborator, before address
/// translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Address the cluster advertises for the host.
    pub address: IpAddr,
    /// Native protocol port.
    pub port: u16,
    /// Datacenter name.
    pub datacenter: Option<String>,
    /// Rack name.
    pub rack: Option<String>,
    /// Tokens owned by the host.
    pub tokens: Vec<Token>,
    /// Server-assigned host id.
    pub host_id: Option<Uuid>,
}

impl HostInfo {
    /// Creates metadata with only an address and port.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            datacenter: None,
            rack: None,
            tokens: Vec::new(),
            host_id: None,
        }
    }

    /// Sets the datacenter.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// Sets the rack.
    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    /// Sets the owned tokens.
    pub fn with_tokens(mut self, tokens: Vec<Token>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Sets the host id.
    pub fn with_host_id(mut self, host_id: Uuid) -> Self {
        self.host_id = Some(host_id);
        self
    }
}

/// A cluster node as tracked by the [`HostRegistry`](super::HostRegistry).
///
/// The address is fixed at creation. Reported metadata is set at most once:
/// at creation for hosts learned from the topology, or later for a contact
/// point the topology describes. State and distance are atomics written
/// only by the registry, so every holder of an `Arc<Host>` observes changes
/// immediately.
#[derive(Debug)]
pub struct Host {
    address: SocketAddr,
    metadata: OnceLock<HostMetadata>,
    state: AtomicU8,
    distance: AtomicU8,
}

#[derive(Debug)]
struct HostMetadata {
    datacenter: Option<String>,
    rack: Option<String>,
    tokens: Vec<Token>,
    host_id: Option<Uuid>,
}

impl From<HostInfo> for HostMetadata {
    fn from(info: HostInfo) -> Self {
        Self {
            datacenter: info.datacenter,
            rack: info.rack,
            tokens: info.tokens,
            host_id: info.host_id,
        }
    }
}

impl Host {
    /// Creates a host in the `UP` state with `LOCAL` distance and no
    /// metadata.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            metadata: OnceLock::new(),
            state: AtomicU8::new(HostState::Up as u8),
            distance: AtomicU8::new(HostDistance::Local as u8),
        }
    }

    /// Creates a host from topology metadata and its translated address.
    pub fn from_info(address: SocketAddr, info: HostInfo) -> Self {
        let host = Self::new(address);
        let _ = host.metadata.set(info.into());
        host
    }

    /// Returns the connect address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the datacenter, if known.
    pub fn datacenter(&self) -> Option<&str> {
        self.metadata.get().and_then(|m| m.datacenter.as_deref())
    }

    /// Returns the rack, if known.
    pub fn rack(&self) -> Option<&str> {
        self.metadata.get().and_then(|m| m.rack.as_deref())
    }

    /// Returns the tokens owned by this host.
    pub fn tokens(&self) -> &[Token] {
        self.metadata.get().map_or(&[][..], |m| m.tokens.as_slice())
    }

    /// Returns the server-assigned host id, if known.
    pub fn host_id(&self) -> Option<Uuid> {
        self.metadata.get().and_then(|m| m.host_id)
    }

    /// Returns the current state.
    pub fn state(&self) -> HostState {
        HostState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true when the host is `UP`.
    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    /// Returns the last distance computed for this host.
    pub fn distance(&self) -> HostDistance {
        HostDistance::from_u8(self.distance.load(Ordering::Acquire))
    }

    /// Atomically moves from one of `from` to `to`; returns the previous
    /// state on success.
    pub(crate) fn transition(&self, from: &[HostState], to: HostState) -> Option<HostState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = HostState::from_u8(current);
            if !from.contains(&state) {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(state),
                Err(actual) => current = actual,
            }
        }
    }

    /// A host known only by address, such as a contact point.
    pub(crate) fn is_bare(&self) -> bool {
        self.metadata.get().is_none()
    }

    /// Sets reported metadata on a bare host. Returns false if the host
    /// already had metadata, which is then left unchanged.
    pub(crate) fn adopt_metadata(&self, info: HostInfo) -> bool {
        self.metadata.set(info.into()).is_ok()
    }

    pub(crate) fn set_distance(&self, distance: HostDistance) {
        self.distance.store(distance as u8, Ordering::Release);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
