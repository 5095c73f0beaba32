//! Consistency levels and write types reported by the server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Replica agreement required for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    /// Any node, including hinted handoff.
    Any,
    /// One replica.
    One,
    /// Two replicas.
    Two,
    /// Three replicas.
    Three,
    /// A majority of replicas across all datacenters.
    Quorum,
    /// All replicas.
    All,
    /// A majority of replicas in the local datacenter.
    LocalQuorum,
    /// A majority of replicas in each datacenter.
    EachQuorum,
    /// Serial (Paxos) across datacenters.
    Serial,
    /// Serial (Paxos) in the local datacenter.
    LocalSerial,
    /// One replica in the local datacenter.
    LocalOne,
}

impl Consistency {
    /// Native-protocol code.
    pub fn code(self) -> u16 {
        match self {
            Self::Any => 0x00,
            Self::One => 0x01,
            Self::Two => 0x02,
            Self::Three => 0x03,
            Self::Quorum => 0x04,
            Self::All => 0x05,
            Self::LocalQuorum => 0x06,
            Self::EachQuorum => 0x07,
            Self::Serial => 0x08,
            Self::LocalSerial => 0x09,
            Self::LocalOne => 0x0A,
        }
    }

    /// Whether this level is only valid for lightweight transactions.
    pub fn is_serial(self) -> bool {
        matches!(self, Self::Serial | Self::LocalSerial)
    }

    /// Whether this level only involves the local datacenter.
    pub fn is_dc_local(self) -> bool {
        matches!(self, Self::LocalOne | Self::LocalQuorum | Self::LocalSerial)
    }
}

impl Default for Consistency {
    fn default() -> Self {
        Self::LocalOne
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::Serial => "SERIAL",
            Self::LocalSerial => "LOCAL_SERIAL",
            Self::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Self::Any,
            "ONE" => Self::One,
            "TWO" => Self::Two,
            "THREE" => Self::Three,
            "QUORUM" => Self::Quorum,
            "ALL" => Self::All,
            "LOCAL_QUORUM" => Self::LocalQuorum,
            "EACH_QUORUM" => Self::EachQuorum,
            "SERIAL" => Self::Serial,
            "LOCAL_SERIAL" => Self::LocalSerial,
            "LOCAL_ONE" => Self::LocalOne,
            other => return Err(format!("unknown consistency level '{}'", other)),
        };
        Ok(value)
    }
}

/// Kind of write reported by a write timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    /// Single partition write.
    Simple,
    /// Logged batch, after the batch log was written.
    Batch,
    /// Unlogged batch.
    UnloggedBatch,
    /// Counter update.
    Counter,
    /// Write to the batch log itself, before any mutation was applied.
    BatchLog,
    /// Paxos phase of a lightweight transaction.
    Cas,
    /// Materialized view update.
    View,
    /// Change data capture write.
    Cdc,
}

impl fmt::Display for WriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "SIMPLE",
            Self::Batch => "BATCH",
            Self::UnloggedBatch => "UNLOGGED_BATCH",
            Self::Counter => "COUNTER",
            Self::BatchLog => "BATCH_LOG",
            Self::Cas => "CAS",
            Self::View => "VIEW",
            Self::Cdc => "CDC",
        };
        f.write_str(name)
    }
}
