//! Error types for CQL driver operations.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::consistency::{Consistency, WriteType};

/// Server-side error codes carried by an ERROR response that the core
/// classifies without a dedicated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseErrorCode {
    /// Unexpected server-side failure.
    ServerError,
    /// The server rejected a frame as malformed.
    ProtocolError,
    /// Credentials were rejected.
    BadCredentials,
    /// The coordinator is overloaded.
    Overloaded,
    /// The coordinator is still bootstrapping.
    IsBootstrapping,
    /// A truncate operation failed.
    TruncateError,
    /// A non-timeout read failure on replicas.
    ReadFailure,
    /// A non-timeout write failure on replicas.
    WriteFailure,
    /// A user-defined function failed.
    FunctionFailure,
    /// Query syntax error.
    SyntaxError,
    /// The logged-in user lacks permission.
    Unauthorized,
    /// The query is syntactically valid but invalid.
    Invalid,
    /// The query is invalid because of a configuration issue.
    ConfigError,
    /// The keyspace or table already exists.
    AlreadyExists,
    /// The prepared statement id is unknown to the host.
    Unprepared,
}

impl ResponseErrorCode {
    /// Returns the native-protocol code for this error.
    pub fn code(self) -> i32 {
        match self {
            Self::ServerError => 0x0000,
            Self::ProtocolError => 0x000A,
            Self::BadCredentials => 0x0100,
            Self::Overloaded => 0x1001,
            Self::IsBootstrapping => 0x1002,
            Self::TruncateError => 0x1003,
            Self::ReadFailure => 0x1300,
            Self::FunctionFailure => 0x1400,
            Self::WriteFailure => 0x1500,
            Self::SyntaxError => 0x2000,
            Self::Unauthorized => 0x2100,
            Self::Invalid => 0x2200,
            Self::ConfigError => 0x2300,
            Self::AlreadyExists => 0x2400,
            Self::Unprepared => 0x2500,
        }
    }

    /// Maps a native-protocol code back to a variant.
    pub fn from_code(code: i32) -> Option<Self> {
        let value = match code {
            0x0000 => Self::ServerError,
            0x000A => Self::ProtocolError,
            0x0100 => Self::BadCredentials,
            0x1001 => Self::Overloaded,
            0x1002 => Self::IsBootstrapping,
            0x1003 => Self::TruncateError,
            0x1300 => Self::ReadFailure,
            0x1400 => Self::FunctionFailure,
            0x1500 => Self::WriteFailure,
            0x2000 => Self::SyntaxError,
            0x2100 => Self::Unauthorized,
            0x2200 => Self::Invalid,
            0x2300 => Self::ConfigError,
            0x2400 => Self::AlreadyExists,
            0x2500 => Self::Unprepared,
            _ => return None,
        };
        Some(value)
    }

    /// Whether another host may succeed where this one failed.
    ///
    /// Retryable codes are routed to the retry policy as request errors;
    /// everything else terminates the request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::Overloaded | Self::IsBootstrapping | Self::TruncateError
        )
    }
}

impl fmt::Display for ResponseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServerError => "server_error",
            Self::ProtocolError => "protocol_error",
            Self::BadCredentials => "bad_credentials",
            Self::Overloaded => "overloaded",
            Self::IsBootstrapping => "is_bootstrapping",
            Self::TruncateError => "truncate_error",
            Self::ReadFailure => "read_failure",
            Self::FunctionFailure => "function_failure",
            Self::WriteFailure => "write_failure",
            Self::SyntaxError => "syntax_error",
            Self::Unauthorized => "unauthorized",
            Self::Invalid => "invalid",
            Self::ConfigError => "config_error",
            Self::AlreadyExists => "already_exists",
            Self::Unprepared => "unprepared",
        };
        write!(f, "{} (0x{:04x})", name, self.code())
    }
}

/// The main error type for CQL driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Every host of the query plan failed or the plan was empty.
    #[error("no host available: {message}")]
    NoHostAvailable {
        /// Summary of why the plan was exhausted.
        message: String,
        /// The last error observed on each host that was tried.
        errors: Vec<(SocketAddr, String)>,
    },

    /// Replicas did not answer a read in time.
    #[error(
        "read timeout at consistency {consistency}: {received} of {block_for} replicas responded (data present: {data_present})"
    )]
    ReadTimeout {
        /// Consistency level of the failed read.
        consistency: Consistency,
        /// Replicas that answered.
        received: u32,
        /// Replicas required.
        block_for: u32,
        /// Whether the data replica answered.
        data_present: bool,
    },

    /// Replicas did not acknowledge a write in time.
    #[error(
        "write timeout at consistency {consistency} for {write_type} write: {received} of {block_for} replicas acknowledged"
    )]
    WriteTimeout {
        /// Consistency level of the failed write.
        consistency: Consistency,
        /// Replicas that acknowledged.
        received: u32,
        /// Replicas required.
        block_for: u32,
        /// Kind of write that timed out.
        write_type: WriteType,
    },

    /// The coordinator knew too few replicas were alive to try.
    #[error("not enough replicas available at consistency {consistency}: {alive} alive, {required} required")]
    Unavailable {
        /// Consistency level requested.
        consistency: Consistency,
        /// Replicas required.
        required: u32,
        /// Replicas known alive.
        alive: u32,
    },

    /// Transport-level failure (socket closed, reset, refused).
    #[error("connection error: {0}")]
    Connection(String),

    /// A single attempt exceeded its client-side deadline on one host.
    #[error("operation timed out on {host}: {message}")]
    OperationTimedOut {
        /// Host the attempt was sent to.
        host: SocketAddr,
        /// Description of the timeout.
        message: String,
    },

    /// A server ERROR response without a dedicated variant.
    #[error("server error {code}: {message}")]
    Response {
        /// The classified error code.
        code: ResponseErrorCode,
        /// Server-supplied message.
        message: String,
    },

    /// The whole request, across retries and speculative executions,
    /// exceeded its deadline.
    #[error("request timed out after {0:?}")]
    RequestTimedOut(Duration),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The host has no free request slot and its wait queue is full.
    #[error("host {address} is busy: {max_in_flight} requests in flight and the wait queue is full")]
    Busy {
        /// Saturated host.
        address: SocketAddr,
        /// In-flight limit configured for the host.
        max_in_flight: usize,
    },

    /// Authentication errors (invalid credentials, missing authenticator).
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The operation or value type is not supported by this driver.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Invalid arguments when building a value or a policy.
    #[error("invalid argument: {0}")]
    Construction(String),

    /// Protocol-related errors (unexpected response, unsupported version).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// Builds a [`DriverError::NoHostAvailable`] from the per-host errors.
    pub fn no_host_available(errors: Vec<(SocketAddr, String)>) -> Self {
        let message = if errors.is_empty() {
            "query plan was empty".to_string()
        } else {
            format!("all {} tried hosts failed", errors.len())
        };
        Self::NoHostAvailable { message, errors }
    }

    /// Whether this error is reported before any network activity and must
    /// never be retried.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::Construction(_) | Self::UnsupportedOperation(_) | Self::Configuration(_)
        )
    }

    /// Short stable label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoHostAvailable { .. } => "no_host_available",
            Self::ReadTimeout { .. } => "read_timeout",
            Self::WriteTimeout { .. } => "write_timeout",
            Self::Unavailable { .. } => "unavailable",
            Self::Connection(_) => "connection",
            Self::OperationTimedOut { .. } => "operation_timed_out",
            Self::Response { .. } => "response",
            Self::RequestTimedOut(_) => "request_timed_out",
            Self::Cancelled => "cancelled",
            Self::Busy { .. } => "busy",
            Self::Authentication(_) => "authentication",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::Construction(_) => "construction",
            Self::Protocol(_) => "protocol",
            Self::Configuration(_) => "configuration",
            Self::Io(_) => "io",
        }
    }
}

/// A specialized `Result` type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
