//! Error types

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while preparing credentials or establishing a socket.
///
/// Credential stage errors (`Load`, `Parse`, `Validation`) display the
/// stage's message verbatim so the underlying cause stays visible through
/// [`Connection::initialize`](crate::Connection::initialize) and
/// [`Connection::connect`](crate::Connection::connect).
///
/// `Error` is `Clone` because one memoized initialization outcome is handed to
/// every caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A credential source could not be read
    #[error("{0}")]
    Load(String),

    /// Credential data was not in a recognized format
    #[error("{0}")]
    Parse(String),

    /// Credentials are structurally inconsistent
    #[error("{0}")]
    Validation(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Socket closed before the connection completed
    #[error("socket closed before the connection was established")]
    ConnectionClosed,

    /// Socket establishment exceeded the configured timeout
    #[error("timed out establishing the gateway socket")]
    Timeout,

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

impl Error {
    /// Short label for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Load(_) => "load",
            Error::Parse(_) => "parse",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::Tls(_) => "tls",
            Error::Io(_) => "io",
            Error::ConnectionClosed => "connection_closed",
            Error::Timeout => "timeout",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}
