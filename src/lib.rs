//! apn-gateway: a mutually-authenticated TLS connection manager for the push
//! notification gateway.
//!
//! A [`Connection`] resolves the gateway address once at construction, runs the
//! credential pipeline (load, parse, validate) at most once, and hands the
//! resulting identity to a socket factory every time [`Connection::connect`]
//! is called.
//!
//! ```no_run
//! # async fn example() -> apn_gateway::Result<()> {
//! use apn_gateway::{Connection, ConnectionConfig};
//!
//! let config = ConnectionConfig::builder()
//!     .cert("/etc/apn/cert.pem")
//!     .key("/etc/apn/key.pem")
//!     .production(true)
//!     .build();
//!
//! let connection = Connection::new(config);
//! let socket = connection.connect().await?;
//! socket.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod connection;
pub mod credentials;
pub mod error;
pub mod metrics;

pub use connection::{Connection, ConnectionBuilder, ConnectionConfig, ConnectionConfigBuilder};
pub use credentials::{CredentialSource, Credentials};
pub use error::{Error, Result};
