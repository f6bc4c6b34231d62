//! Socket options and the socket construction seam

use crate::credentials::Credentials;
use crate::Result;
use bytes::Bytes;
use std::fmt;

/// Completion callback handed to a [`SocketFactory`].
///
/// Called once when the socket is established, or with the failure that
/// prevented it. Dropping it without calling is reported as
/// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed).
pub type ConnectCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Everything a TLS handshake with the gateway needs.
///
/// Identity fields are only set when the credentials carried a non-empty
/// value, so a pfx-only identity never gains an empty cert/key pair.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Gateway hostname (also used for SNI)
    pub host: String,
    /// Gateway port
    pub port: u16,
    /// Client certificate chain
    pub cert: Option<Bytes>,
    /// Client private key
    pub key: Option<Bytes>,
    /// Trust anchors
    pub ca: Vec<Bytes>,
    /// PKCS#12 archive
    pub pfx: Option<Bytes>,
    /// Passphrase for `pfx` or `key`
    pub passphrase: Option<String>,
}

impl SocketOptions {
    /// Assemble options from the resolved endpoint and credentials
    pub fn new(host: impl Into<String>, port: u16, credentials: &Credentials) -> Self {
        let present = |buf: &Option<Bytes>| buf.clone().filter(|b| !b.is_empty());
        Self {
            host: host.into(),
            port,
            cert: present(&credentials.cert),
            key: present(&credentials.key),
            ca: credentials
                .ca
                .iter()
                .filter(|b| !b.is_empty())
                .cloned()
                .collect(),
            pfx: present(&credentials.pfx),
            passphrase: credentials
                .passphrase
                .clone()
                .filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Debug for SocketOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cert", &self.cert.is_some())
            .field("key", &self.key.is_some())
            .field("ca_count", &self.ca.len())
            .field("pfx", &self.pfx.is_some())
            .field("passphrase", &self.passphrase.is_some())
            .finish()
    }
}

/// Constructs gateway sockets.
///
/// `create_socket` returns the handle immediately; `on_connect` fires once the
/// socket is usable. Failures signalled on the socket after that are the
/// socket's own concern.
pub trait SocketFactory: Send + Sync {
    /// Handle returned to the caller of `connect()`
    type Socket: Send;

    /// Start establishing a socket with `options`
    fn create_socket(&self, options: SocketOptions, on_connect: ConnectCallback)
        -> Result<Self::Socket>;
}
