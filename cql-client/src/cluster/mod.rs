//! Cluster view: hosts, their state machine, the token ring and the
//! background reconnection of down hosts.

mod host;
mod reconnection;
mod registry;
mod token_ring;

pub use host::{Host, HostDistance, HostInfo, HostState};
pub use reconnection::ReconnectionSupervisor;
pub use registry::{DistanceClassifier, HostEvent, HostRegistry, Topology, TopologyUpdate};
pub use token_ring::TokenRing;
