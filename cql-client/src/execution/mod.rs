//! Per-request types and the request execution orchestrator.

mod request_execution;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cql_core::{ColumnSet, Consistency, CqlValue, Row};

use crate::config::{ConfigError, QueryOptions};

pub use request_execution::RequestHandler;

/// A CQL statement with its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    query: String,
    values: Vec<CqlValue>,
}

impl Statement {
    /// Creates a statement without bound values.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
        }
    }

    /// Binds positional values.
    pub fn bind(mut self, values: impl IntoIterator<Item = CqlValue>) -> Self {
        self.values = values.into_iter().collect();
        self
    }

    /// Returns the query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the bound values.
    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::new(query)
    }
}

/// Snapshot of the settings of one request. Immutable once the request
/// starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    keyspace: Option<String>,
    consistency: Consistency,
    serial_consistency: Option<Consistency>,
    is_idempotent: bool,
    custom_payload: HashMap<String, Bytes>,
    page_size: usize,
    request_timeout: Option<Duration>,
    routing_key: Option<Bytes>,
    timestamp: Option<i64>,
}

impl ExecutionOptions {
    /// Creates an options builder.
    pub fn builder() -> ExecutionOptionsBuilder {
        ExecutionOptionsBuilder::new()
    }

    /// Target keyspace.
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Consistency level.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Serial consistency for lightweight transactions.
    pub fn serial_consistency(&self) -> Option<Consistency> {
        self.serial_consistency
    }

    /// Whether the statement may be applied more than once safely.
    pub fn is_idempotent(&self) -> bool {
        self.is_idempotent
    }

    /// Custom payload sent with the request.
    pub fn custom_payload(&self) -> &HashMap<String, Bytes> {
        &self.custom_payload
    }

    /// Rows per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Deadline for the whole request, across retries and speculative
    /// executions.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Serialized partition key used for token-aware routing.
    pub fn routing_key(&self) -> Option<&Bytes> {
        self.routing_key.as_ref()
    }

    /// Explicit client timestamp in microseconds.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

impl ExecutionOptions {
    pub(crate) fn from_defaults(defaults: &QueryOptions) -> Self {
        Self {
            keyspace: defaults.keyspace().map(str::to_string),
            consistency: defaults.consistency(),
            serial_consistency: defaults.serial_consistency(),
            is_idempotent: defaults.is_idempotent(),
            custom_payload: HashMap::new(),
            page_size: defaults.page_size(),
            request_timeout: defaults.request_timeout(),
            routing_key: None,
            timestamp: None,
        }
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        QueryOptions::default().to_execution_options()
    }
}

/// Builder for [`ExecutionOptions`]. Unset fields take the values of the
/// [`QueryOptions`] passed to [`ExecutionOptionsBuilder::build_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptionsBuilder {
    keyspace: Option<String>,
    consistency: Option<Consistency>,
    serial_consistency: Option<Consistency>,
    is_idempotent: Option<bool>,
    custom_payload: HashMap<String, Bytes>,
    page_size: Option<usize>,
    request_timeout: Option<Duration>,
    routing_key: Option<Bytes>,
    timestamp: Option<i64>,
}

impl ExecutionOptionsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keyspace.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Sets the consistency level.
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Sets the serial consistency level.
    pub fn serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    /// Marks the statement idempotent or not.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.is_idempotent = Some(idempotent);
        self
    }

    /// Adds a custom payload entry.
    pub fn custom_payload(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.custom_payload.insert(key.into(), value.into());
        self
    }

    /// Sets the page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the overall request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the routing key.
    pub fn routing_key(mut self, key: impl Into<Bytes>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Sets an explicit client timestamp in microseconds.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the options over the built-in defaults.
    pub fn build(self) -> Result<ExecutionOptions, ConfigError> {
        self.build_with(&QueryOptions::default())
    }

    /// Builds the options, taking unset fields from `defaults`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `page_size` is zero
    /// - `request_timeout` is zero
    pub fn build_with(self, defaults: &QueryOptions) -> Result<ExecutionOptions, ConfigError> {
        let page_size = self.page_size.unwrap_or(defaults.page_size());
        if page_size == 0 {
            return Err(ConfigError::new("page_size must be greater than zero"));
        }
        let request_timeout = self.request_timeout.or(defaults.request_timeout());
        if request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::new("request_timeout must be greater than zero"));
        }

        Ok(ExecutionOptions {
            keyspace: self.keyspace.or_else(|| defaults.keyspace().map(str::to_string)),
            consistency: self.consistency.unwrap_or(defaults.consistency()),
            serial_consistency: self.serial_consistency.or(defaults.serial_consistency()),
            is_idempotent: self.is_idempotent.unwrap_or(defaults.is_idempotent()),
            custom_payload: self.custom_payload,
            page_size,
            request_timeout,
            routing_key: self.routing_key,
            timestamp: self.timestamp,
        })
    }
}

/// State of one logical request, shared by all of its executions.
///
/// Created once per request; the retry counter only grows.
#[derive(Debug)]
pub struct OperationInfo {
    statement: Arc<Statement>,
    options: Arc<ExecutionOptions>,
    retry_count: AtomicU32,
}

impl OperationInfo {
    /// Creates the state of a new request.
    pub fn new(statement: Arc<Statement>, options: Arc<ExecutionOptions>) -> Self {
        Self {
            statement,
            options,
            retry_count: AtomicU32::new(0),
        }
    }

    /// The statement being executed.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The query text.
    pub fn query(&self) -> &str {
        self.statement.query()
    }

    /// The options in effect.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Shorthand for `options().is_idempotent()`.
    pub fn is_idempotent(&self) -> bool {
        self.options.is_idempotent()
    }

    /// Number of retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub(crate) fn shared_statement(&self) -> Arc<Statement> {
        Arc::clone(&self.statement)
    }

    pub(crate) fn shared_options(&self) -> Arc<ExecutionOptions> {
        Arc::clone(&self.options)
    }

    pub(crate) fn increment_retry_count(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// One attempt handed to the connection layer.
#[derive(Debug, Clone)]
pub struct Request {
    statement: Arc<Statement>,
    options: Arc<ExecutionOptions>,
    consistency: Consistency,
    timestamp: Option<i64>,
    execution_index: u32,
}

impl Request {
    pub(crate) fn new(
        statement: Arc<Statement>,
        options: Arc<ExecutionOptions>,
        consistency: Consistency,
        timestamp: Option<i64>,
        execution_index: u32,
    ) -> Self {
        Self {
            statement,
            options,
            consistency,
            timestamp,
            execution_index,
        }
    }

    /// The statement to send.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Request options.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Consistency for this attempt; a retry decision may lower it.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Client timestamp in microseconds, shared by every attempt.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// 0 for the original execution, then 1, 2, ... for speculative ones.
    pub fn execution_index(&self) -> u32 {
        self.execution_index
    }
}

/// How a successful request was served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionInfo {
    /// Host that produced the result.
    pub queried_host: Option<SocketAddr>,
    /// Every host an attempt was sent to, in order.
    pub tried_hosts: Vec<SocketAddr>,
    /// Speculative executions started.
    pub speculative_executions: u32,
    /// Retries performed.
    pub retry_count: u32,
    /// Consistency of the successful attempt.
    pub achieved_consistency: Option<Consistency>,
}

/// Rows returned by a request.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Arc<ColumnSet>,
    rows: Vec<Row>,
    paging_state: Option<Bytes>,
    info: ExecutionInfo,
}

impl ResultSet {
    /// Creates a result set.
    pub fn new(columns: Arc<ColumnSet>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            paging_state: None,
            info: ExecutionInfo::default(),
        }
    }

    /// An empty result, used for void responses and ignored failures.
    pub fn empty() -> Self {
        Self::new(Arc::new(ColumnSet::new(Vec::new())), Vec::new())
    }

    /// Sets the paging state for the next page.
    pub fn with_paging_state(mut self, paging_state: Bytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    /// Column metadata shared by the rows.
    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    /// The rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the set and returns the rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Paging state for the next page.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    /// How the request was served.
    pub fn info(&self) -> &ExecutionInfo {
        &self.info
    }

    pub(crate) fn set_info(&mut self, info: ExecutionInfo) {
        self.info = info;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_takes_unset_fields_from_defaults() {
        let defaults = QueryOptions::builder()
            .consistency(Consistency::Quorum)
            .idempotent(true)
            .build()
            .unwrap();
        let options = ExecutionOptions::builder()
            .keyspace("ks")
            .build_with(&defaults)
            .unwrap();
        assert_eq!(options.consistency(), Consistency::Quorum);
        assert!(options.is_idempotent());
        assert_eq!(options.keyspace(), Some("ks"));
    }

    #[test]
    fn test_builder_rejects_zero_page_size() {
        let err = ExecutionOptions::builder().page_size(0).build().unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_operation_info_counts_retries() {
        let info = OperationInfo::new(
            Arc::new(Statement::new("SELECT 1")),
            Arc::new(ExecutionOptions::default()),
        );
        assert_eq!(info.retry_count(), 0);
        assert_eq!(info.increment_retry_count(), 1);
        assert_eq!(info.retry_count(), 1);
        assert_eq!(info.query(), "SELECT 1");
    }

    #[test]
    fn test_empty_result_set() {
        let rs = ResultSet::empty();
        assert!(rs.rows().is_empty());
        assert!(rs.first().is_none());
        assert_eq!(rs.info(), &ExecutionInfo::default());
    }
}
