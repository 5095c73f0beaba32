//! Request execution core for a CQL native-protocol driver.
//!
//! This crate decides where a statement goes and what happens when it
//! fails. The connection layer (frame codec, sockets, TLS) is supplied by
//! the caller as a [`Transport`]; everything above it lives here.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cql_client::{Client, ClientConfig, Consistency, ExecutionOptions};
//!
//! let config = ClientConfig::builder()
//!     .add_contact_point("10.0.0.1".parse()?)
//!     .local_datacenter("dc1")
//!     .query(|q| q.consistency(Consistency::LocalQuorum))
//!     .build()?;
//! let client = Client::connect(config, Arc::new(my_transport)).await?;
//!
//! let options = ExecutionOptions::builder().idempotent(true).build()?;
//! let rows = client.execute("SELECT * FROM users", Some(options)).await?;
//! client.shutdown().await;
//! ```
//!
//! # Components
//!
//! | Concern | Types |
//! |---------|-------|
//! | Host state | [`HostRegistry`], [`Host`], [`HostState`], [`HostDistance`] |
//! | Routing | [`RoundRobinPolicy`], [`DcAwareRoundRobinPolicy`], [`TokenAwarePolicy`], [`AllowListPolicy`] |
//! | Failures | [`DefaultRetryPolicy`], [`IdempotenceAwareRetryPolicy`], [`FallthroughRetryPolicy`] |
//! | Latency | [`ConstantSpeculativeExecutionPolicy`] |
//! | Recovery | [`ExponentialReconnectionPolicy`], [`ConstantReconnectionPolicy`], [`ReconnectionSupervisor`] |
//! | Write ordering | [`MonotonicTimestampGenerator`] |
//! | Credentials | [`PlainTextAuthProvider`], [`authenticate`] |
//! | Rows | [`Row`], [`Tuple`], [`RowAdapter`], [`JsonMappingInfo`] |
//!
//! # Feature Flags
//!
//! - `metrics`: [`PrometheusMetrics`] exporter.
//! - `config-file`: YAML and TOML configuration loading.

#![warn(missing_docs)]

pub mod client;
pub mod cluster;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod execution;
pub mod mapping;
pub mod metrics;
pub mod policies;
pub mod security;

pub use client::Client;
pub use cluster::{
    DistanceClassifier, Host, HostDistance, HostEvent, HostInfo, HostRegistry, HostState,
    ReconnectionSupervisor, TokenRing, Topology, TopologyUpdate,
};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, PoolingConfig, PoolingConfigBuilder,
    QueryOptions, QueryOptionsBuilder, DEFAULT_PORT,
};
#[cfg(feature = "config-file")]
pub use config_file::load_config;
pub use config_file::FileConfig;
pub use connection::{ConnectionEvent, RequestSlot, RequestSlots, Transport};
pub use execution::{
    ExecutionInfo, ExecutionOptions, ExecutionOptionsBuilder, OperationInfo, Request,
    RequestHandler, ResultSet, Statement,
};
pub use mapping::{map_rows, JsonMappingInfo, MappingInfo, NameMapping, RowAdapter, ToModelFn};
#[cfg(feature = "metrics")]
pub use metrics::{MetricsError, PrometheusMetrics};
pub use metrics::{NoopMetrics, RequestMetrics};
pub use policies::address_resolution::{
    AddressTranslator, IdentityTranslator, StaticMappingTranslator,
};
pub use policies::load_balancing::{
    AllowListPolicy, DcAwareRoundRobinPolicy, LoadBalancingPolicy, QueryPlan, RoundRobinPolicy,
    TokenAwarePolicy,
};
pub use policies::reconnection::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, ReconnectionPolicy,
};
pub use policies::retry::{
    DecisionInfo, DefaultRetryPolicy, FallthroughRetryPolicy, IdempotenceAwareRetryPolicy,
    RetryPolicy,
};
pub use policies::speculative_execution::{
    ConstantSpeculativeExecutionPolicy, NoSpeculativeExecutionPolicy, SpeculativeExecutionPolicy,
};
pub use policies::timestamp_generation::{MonotonicTimestampGenerator, TimestampGenerator};
pub use policies::Policies;
pub use security::{
    authenticate, AuthChannel, AuthError, AuthProvider, AuthStep, Authenticator, NoAuthProvider,
    PlainTextAuthProvider,
};

pub use cql_core::{
    ColumnSet, ColumnSpec, ColumnType, Consistency, CqlValue, DriverError, ResponseErrorCode,
    Result, Row, Token, Tuple, WriteType,
};
