use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use cql_core::DriverError;

/// Upper bound on challenge rounds before the exchange is abandoned.
const MAX_CHALLENGE_ROUNDS: usize = 64;

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server requires authentication but no provider was configured.
    MissingAuthenticator {
        /// The host asking for credentials.
        endpoint: SocketAddr,
    },
    /// The server rejected the credentials.
    Rejected(String),
    /// The exchange did not follow the expected sequence.
    ProtocolError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthenticator { endpoint } => write!(
                f,
                "Host {} requires authentication, but no authenticator found in the options",
                endpoint
            ),
            AuthError::Rejected(msg) => write!(f, "authentication rejected: {}", msg),
            AuthError::ProtocolError(msg) => write!(f, "authentication protocol error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for DriverError {
    fn from(err: AuthError) -> Self {
        DriverError::Authentication(err.to_string())
    }
}

/// One authentication exchange on one connection.
///
/// A new authenticator is created for every connection and dropped once the
/// exchange ends.
#[async_trait]
pub trait Authenticator: Send + std::fmt::Debug {
    /// The first token sent to the server.
    async fn initial_response(&mut self) -> Result<Option<Bytes>, AuthError>;

    /// Answers a server challenge. `None` sends an empty response.
    async fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Option<Bytes>, AuthError>;

    /// Called once the server accepts the exchange, with its final token.
    async fn on_authentication_success(
        &mut self,
        _token: Option<&[u8]>,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Creates authenticators for new connections.
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    /// Creates the authenticator for a connection to `endpoint`, which
    /// announced the authenticator class `name`.
    fn new_authenticator(&self, endpoint: SocketAddr, name: &str) -> Box<dyn Authenticator>;
}

/// Server reply to a response token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Another round is needed.
    Challenge(Bytes),
    /// The server accepted the credentials.
    Success(Option<Bytes>),
}

/// The connection side of an exchange: sends a response token and returns
/// the server reply. Implemented by the connection layer.
#[async_trait]
pub trait AuthChannel: Send {
    /// Sends `token` and waits for the server reply.
    async fn send_response(&mut self, token: Option<Bytes>) -> Result<AuthStep, AuthError>;
}

/// Drives `authenticator` over `channel` until the server accepts or
/// rejects it.
///
/// # Errors
///
/// Returns [`DriverError::Authentication`] if the authenticator fails, the
/// server rejects the credentials, or the exchange does not converge.
pub async fn authenticate(
    authenticator: &mut dyn Authenticator,
    channel: &mut dyn AuthChannel,
) -> Result<(), DriverError> {
    let mut token = authenticator.initial_response().await?;
    for _ in 0..MAX_CHALLENGE_ROUNDS {
        match channel.send_response(token).await? {
            AuthStep::Challenge(challenge) => {
                token = authenticator.evaluate_challenge(&challenge).await?;
            }
            AuthStep::Success(final_token) => {
                authenticator
                    .on_authentication_success(final_token.as_deref())
                    .await?;
                tracing::debug!("authentication succeeded");
                return Ok(());
            }
        }
    }
    Err(AuthError::ProtocolError(format!(
        "no success after {} challenge rounds",
        MAX_CHALLENGE_ROUNDS
    ))
    .into())
}

/// Username and password sent as a single `\0user\0password` token.
#[derive(Clone)]
pub struct PlainTextAuthProvider {
    username: String,
    password: String,
}

impl PlainTextAuthProvider {
    /// Creates a provider with the given credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for PlainTextAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextAuthProvider")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl AuthProvider for PlainTextAuthProvider {
    fn new_authenticator(&self, _endpoint: SocketAddr, _name: &str) -> Box<dyn Authenticator> {
        Box::new(PlainTextAuthenticator {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Authenticator created by [`PlainTextAuthProvider`].
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl std::fmt::Debug for PlainTextAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for PlainTextAuthenticator {
    async fn initial_response(&mut self) -> Result<Option<Bytes>, AuthError> {
        let mut token = BytesMut::with_capacity(self.username.len() + self.password.len() + 2);
        token.put_u8(0);
        token.put_slice(self.username.as_bytes());
        token.put_u8(0);
        token.put_slice(self.password.as_bytes());
        Ok(Some(token.freeze()))
    }

    async fn evaluate_challenge(
        &mut self,
        _challenge: &[u8],
    ) -> Result<Option<Bytes>, AuthError> {
        Ok(None)
    }
}

/// Used when no credentials are configured; fails as soon as a server asks
/// for authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthProvider;

impl AuthProvider for NoAuthProvider {
    fn new_authenticator(&self, endpoint: SocketAddr, _name: &str) -> Box<dyn Authenticator> {
        Box::new(NoAuthAuthenticator { endpoint })
    }
}

#[derive(Debug)]
struct NoAuthAuthenticator {
    endpoint: SocketAddr,
}

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    async fn initial_response(&mut self) -> Result<Option<Bytes>, AuthError> {
        Err(AuthError::MissingAuthenticator {
            endpoint: self.endpoint,
        })
    }

    async fn evaluate_challenge(
        &mut self,
        _challenge: &[u8],
    ) -> Result<Option<Bytes>, AuthError> {
        Err(AuthError::MissingAuthenticator {
            endpoint: self.endpoint,
        })
    }
}
