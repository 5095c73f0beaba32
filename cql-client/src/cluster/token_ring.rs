//! Token ownership for replica lookup.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use cql_core::Token;

use super::Host;

/// Sorted token → owner map built from host metadata.
#[derive(Debug, Clone, Default)]
pub struct TokenRing {
    ring: BTreeMap<Token, SocketAddr>,
}

impl TokenRing {
    /// Builds the ring from the tokens of every host.
    pub fn build<'a, I>(hosts: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Host>>,
    {
        let mut ring = BTreeMap::new();
        for host in hosts {
            for token in host.tokens() {
                ring.insert(*token, host.address());
            }
        }
        Self { ring }
    }

    /// Returns true if no host reported tokens.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns up to `replication_factor` distinct hosts owning `token`,
    /// walking the ring clockwise from the first token not lower than it.
    pub fn replicas(&self, token: Token, replication_factor: usize) -> Vec<SocketAddr> {
        let mut replicas = Vec::with_capacity(replication_factor);
        if replication_factor == 0 {
            return replicas;
        }
        let mut seen = HashSet::new();
        for (_, address) in self.ring.range(token..).chain(self.ring.range(..token)) {
            if seen.insert(*address) {
                replicas.push(*address);
                if replicas.len() == replication_factor {
                    break;
                }
            }
        }
        replicas
    }
}
