//! Connection management
//!
//! This module handles:
//! * Gateway endpoint resolution (explicit address, production flag, environment)
//! * Memoized credential initialization
//! * Socket option assembly and the socket construction seam
//! * rustls-backed gateway sockets and their state machine

mod conn;
pub mod endpoint;
mod socket;
mod state;
mod tls;
mod transport;

pub use conn::{
    Connection, ConnectionBuilder, ConnectionConfig, ConnectionConfigBuilder, Initialization,
    DEFAULT_CERT_PATH, DEFAULT_KEY_PATH,
};
pub use endpoint::{resolve_address, GATEWAY_PORT, PRODUCTION_GATEWAY, SANDBOX_GATEWAY};
pub use socket::{ConnectCallback, SocketFactory, SocketOptions};
pub use state::SocketState;
pub use tls::TlsConfig;
pub use transport::{GatewayStream, SocketEvent, TlsSocket, TlsSocketFactory, TlsSocketFactoryBuilder};
