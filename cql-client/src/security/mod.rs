//! Authentication contract: per-connection authenticators and the
//! challenge/response exchange that drives them.

pub mod authenticator;

pub use authenticator::{
    authenticate, AuthChannel, AuthError, AuthProvider, AuthStep, Authenticator, NoAuthProvider,
    PlainTextAuthProvider, PlainTextAuthenticator,
};
