//! Client configuration types and builders.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use cql_core::{Consistency, DriverError};

use crate::execution::ExecutionOptions;
use crate::metrics::{NoopMetrics, RequestMetrics};
use crate::policies::Policies;
use crate::security::AuthProvider;

/// Default native protocol port.
pub const DEFAULT_PORT: u16 = 9042;
/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default consistency level.
const DEFAULT_CONSISTENCY: Consistency = Consistency::LocalOne;
/// Default page size.
const DEFAULT_PAGE_SIZE: usize = 5000;
/// Default overall request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);
/// Default in-flight requests per host.
const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 2048;
/// Default waiting requests per host.
const DEFAULT_MAX_QUEUED_PER_HOST: usize = 256;

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::Configuration(err.message)
    }
}

/// Client-wide defaults for per-request options.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    keyspace: Option<String>,
    consistency: Consistency,
    serial_consistency: Option<Consistency>,
    idempotent: bool,
    page_size: usize,
    request_timeout: Option<Duration>,
}

impl QueryOptions {
    /// Creates a builder.
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::new()
    }

    /// Default keyspace.
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Default consistency level.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Default serial consistency level.
    pub fn serial_consistency(&self) -> Option<Consistency> {
        self.serial_consistency
    }

    /// Whether statements are idempotent unless stated otherwise.
    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Default page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Default overall request timeout; `None` disables it.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Per-request options carrying only these defaults.
    pub fn to_execution_options(&self) -> ExecutionOptions {
        ExecutionOptions::from_defaults(self)
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            keyspace: None,
            consistency: DEFAULT_CONSISTENCY,
            serial_consistency: None,
            idempotent: false,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Builder for `QueryOptions`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptionsBuilder {
    keyspace: Option<String>,
    consistency: Option<Consistency>,
    serial_consistency: Option<Consistency>,
    idempotent: Option<bool>,
    page_size: Option<usize>,
    request_timeout: Option<Option<Duration>>,
}

impl QueryOptionsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default keyspace.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Sets the default consistency level.
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Sets the default serial consistency level.
    pub fn serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    /// Marks statements idempotent by default.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Sets the default page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the default request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(Some(timeout));
        self
    }

    /// Disables the default request timeout.
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = Some(None);
        self
    }

    /// Builds the options.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `page_size` is zero
    /// - `request_timeout` is zero
    /// - `serial_consistency` is not a serial level
    pub fn build(self) -> Result<QueryOptions, ConfigError> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::new("page_size must be greater than zero"));
        }
        let request_timeout = self.request_timeout.unwrap_or(Some(DEFAULT_REQUEST_TIMEOUT));
        if request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::new("request_timeout must be greater than zero"));
        }
        if let Some(serial) = self.serial_consistency {
            if !serial.is_serial() {
                return Err(ConfigError::new(format!(
                    "serial_consistency must be SERIAL or LOCAL_SERIAL, got {}",
                    serial
                )));
            }
        }

        Ok(QueryOptions {
            keyspace: self.keyspace,
            consistency: self.consistency.unwrap_or(DEFAULT_CONSISTENCY),
            serial_consistency: self.serial_consistency,
            idempotent: self.idempotent.unwrap_or(false),
            page_size,
            request_timeout,
        })
    }
}

/// Per-host admission limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingConfig {
    max_requests_per_host: usize,
    max_queued_per_host: usize,
}

impl PoolingConfig {
    /// Creates a builder.
    pub fn builder() -> PoolingConfigBuilder {
        PoolingConfigBuilder::new()
    }

    /// Maximum requests in flight on one host.
    pub fn max_requests_per_host(&self) -> usize {
        self.max_requests_per_host
    }

    /// Maximum requests waiting for a slot on one host.
    pub fn max_queued_per_host(&self) -> usize {
        self.max_queued_per_host
    }
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            max_requests_per_host: DEFAULT_MAX_REQUESTS_PER_HOST,
            max_queued_per_host: DEFAULT_MAX_QUEUED_PER_HOST,
        }
    }
}

/// Builder for `PoolingConfig`.
#[derive(Debug, Clone, Default)]
pub struct PoolingConfigBuilder {
    max_requests_per_host: Option<usize>,
    max_queued_per_host: Option<usize>,
}

impl PoolingConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-flight limit per host.
    pub fn max_requests_per_host(mut self, max: usize) -> Self {
        self.max_requests_per_host = Some(max);
        self
    }

    /// Sets the queue limit per host. Zero disables queueing.
    pub fn max_queued_per_host(mut self, max: usize) -> Self {
        self.max_queued_per_host = Some(max);
        self
    }

    /// Builds the config, returning an error if `max_requests_per_host` is zero.
    pub fn build(self) -> Result<PoolingConfig, ConfigError> {
        let max_requests_per_host = self
            .max_requests_per_host
            .unwrap_or(DEFAULT_MAX_REQUESTS_PER_HOST);
        if max_requests_per_host == 0 {
            return Err(ConfigError::new("max_requests_per_host must be greater than zero"));
        }
        Ok(PoolingConfig {
            max_requests_per_host,
            max_queued_per_host: self.max_queued_per_host.unwrap_or(DEFAULT_MAX_QUEUED_PER_HOST),
        })
    }
}

/// Main client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    contact_points: Vec<IpAddr>,
    port: u16,
    local_datacenter: Option<String>,
    connection_timeout: Duration,
    query: QueryOptions,
    pooling: PoolingConfig,
    policies: Policies,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    metrics: Arc<dyn RequestMetrics>,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Initial hosts used to discover the cluster.
    pub fn contact_points(&self) -> &[IpAddr] {
        &self.contact_points
    }

    /// Native protocol port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Contact points combined with the port.
    pub fn contact_addresses(&self) -> Vec<SocketAddr> {
        self.contact_points
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }

    /// Local datacenter for DC-aware load balancing.
    pub fn local_datacenter(&self) -> Option<&str> {
        self.local_datacenter.as_deref()
    }

    /// Connection timeout handed to the connection layer.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Defaults for per-request options.
    pub fn query(&self) -> &QueryOptions {
        &self.query
    }

    /// Per-host admission limits.
    pub fn pooling(&self) -> &PoolingConfig {
        &self.pooling
    }

    /// Policies in effect.
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Authentication provider, if the cluster requires one.
    pub fn auth_provider(&self) -> Option<&Arc<dyn AuthProvider>> {
        self.auth_provider.as_ref()
    }

    /// Request metrics sink.
    pub fn metrics(&self) -> &Arc<dyn RequestMetrics> {
        &self.metrics
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            contact_points: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            port: DEFAULT_PORT,
            local_datacenter: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            query: QueryOptions::default(),
            pooling: PoolingConfig::default(),
            policies: Policies::default(),
            auth_provider: None,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    contact_points: Vec<IpAddr>,
    port: Option<u16>,
    local_datacenter: Option<String>,
    connection_timeout: Option<Duration>,
    query: QueryOptionsBuilder,
    pooling: PoolingConfigBuilder,
    policies: Option<Policies>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    metrics: Option<Arc<dyn RequestMetrics>>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a contact point.
    pub fn add_contact_point(mut self, address: IpAddr) -> Self {
        self.contact_points.push(address);
        self
    }

    /// Sets the contact points.
    pub fn contact_points(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.contact_points = addresses.into_iter().collect();
        self
    }

    /// Sets the native protocol port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the local datacenter.
    pub fn local_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.local_datacenter = Some(dc.into());
        self
    }

    /// Sets the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Configures query defaults using a builder function.
    pub fn query<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryOptionsBuilder) -> QueryOptionsBuilder,
    {
        self.query = f(self.query);
        self
    }

    /// Configures admission limits using a builder function.
    pub fn pooling<F>(mut self, f: F) -> Self
    where
        F: FnOnce(PoolingConfigBuilder) -> PoolingConfigBuilder,
    {
        self.pooling = f(self.pooling);
        self
    }

    /// Replaces the policies.
    pub fn policies(mut self, policies: Policies) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Sets the authentication provider.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Sets the request metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn RequestMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    ///
    /// Without explicit policies, the default load balancing policy uses the
    /// configured local datacenter.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let contact_points = if self.contact_points.is_empty() {
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        } else {
            self.contact_points
        };
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::new("port must not be zero"));
        }
        let connection_timeout = self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT);
        if connection_timeout.is_zero() {
            return Err(ConfigError::new("connection_timeout must be greater than zero"));
        }
        if self.local_datacenter.as_deref() == Some("") {
            return Err(ConfigError::new("local_datacenter must not be empty"));
        }

        let query = self.query.build()?;
        let pooling = self.pooling.build()?;
        let policies = self.policies.unwrap_or_else(|| Policies {
            load_balancing: crate::policies::default_load_balancing_policy(
                self.local_datacenter.clone(),
            ),
            ..Policies::default()
        });

        Ok(ClientConfig {
            contact_points,
            port,
            local_datacenter: self.local_datacenter,
            connection_timeout,
            query,
            pooling,
            policies,
            auth_provider: self.auth_provider,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
        })
    }
}
