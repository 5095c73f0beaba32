//! Translation of advertised host addresses to connectable addresses.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use cql_core::{DriverError, Result};

use super::PolicyOptions;

/// Maps an address discovered through topology metadata to the address
/// the client should connect to.
///
/// Invoked once per discovered host when the topology is refreshed, never
/// per request. An error skips that host only.
#[async_trait]
pub trait AddressTranslator: Send + Sync + std::fmt::Debug {
    /// Returns the address to connect to for `address:port`.
    async fn translate(&self, address: IpAddr, port: u16) -> Result<SocketAddr>;

    /// Options exposed for logging.
    fn options(&self) -> PolicyOptions {
        PolicyOptions::new()
    }
}

/// Connects to the advertised address unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

#[async_trait]
impl AddressTranslator for IdentityTranslator {
    async fn translate(&self, address: IpAddr, port: u16) -> Result<SocketAddr> {
        Ok(SocketAddr::new(address, port))
    }
}

/// Static NAT table from advertised IPs to public socket addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticMappingTranslator {
    mappings: HashMap<IpAddr, SocketAddr>,
    strict: bool,
}

impl StaticMappingTranslator {
    /// Creates a translator that passes unmapped addresses through.
    pub fn new(mappings: HashMap<IpAddr, SocketAddr>) -> Self {
        Self {
            mappings,
            strict: false,
        }
    }

    /// Rejects addresses missing from the table instead of passing them
    /// through.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Adds one mapping.
    pub fn with_mapping(mut self, advertised: IpAddr, public: SocketAddr) -> Self {
        self.mappings.insert(advertised, public);
        self
    }
}

#[async_trait]
impl AddressTranslator for StaticMappingTranslator {
    async fn translate(&self, address: IpAddr, port: u16) -> Result<SocketAddr> {
        match self.mappings.get(&address) {
            Some(public) => Ok(*public),
            None if self.strict => Err(DriverError::Connection(format!(
                "no address mapping for {}:{}",
                address, port
            ))),
            None => Ok(SocketAddr::new(address, port)),
        }
    }

    fn options(&self) -> PolicyOptions {
        BTreeMap::from([
            ("mappings", self.mappings.len().to_string()),
            ("strict", self.strict.to_string()),
        ])
    }
}
