//! TLS configuration for the gateway handshake.
//!
//! The gateway requires a client certificate, so every configuration built
//! here carries a client identity. Server certificates are validated against
//! the configured CA list, or the system roots when none is given.

use super::SocketOptions;
use crate::credentials::pem;
use crate::{Error, Result};
use rustls::ClientConfig;
use rustls::RootCertStore;
use std::sync::Arc;

/// Compiled rustls configuration for one socket.
#[derive(Clone)]
pub struct TlsConfig {
    /// Whether a custom CA list replaced the system roots
    custom_roots: bool,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Build a configuration from socket options.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - no CA buffer holds a usable certificate
    /// - no root certificates could be loaded from the system
    /// - the options carry only a PKCS#12 archive, or no identity at all
    /// - the certificate or key cannot be decoded, or rustls rejects them
    pub fn from_options(options: &SocketOptions) -> Result<Self> {
        let custom_roots = !options.ca.is_empty();
        let root_store = if custom_roots {
            load_custom_ca(&options.ca)?
        } else {
            load_system_roots()?
        };

        let (cert, key) = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => (cert, key),
            _ if options.pfx.is_some() => {
                return Err(Error::Tls(
                    "PKCS#12 archives cannot be used directly with rustls; supply the certificate and key".into(),
                ))
            }
            _ => return Err(Error::Tls("no client certificate and key configured".into())),
        };

        let chain = pem::certificates(cert)
            .map_err(|e| Error::Tls(format!("failed to read client certificate: {}", e)))?;
        if chain.is_empty() {
            return Err(Error::Tls("no client certificate found".into()));
        }
        let key = pem::private_key(key)
            .map_err(|e| Error::Tls(format!("failed to read client key: {}", e)))?
            .ok_or_else(|| Error::Tls("no client private key found".into()))?;

        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_client_auth_cert(chain, key)?,
        );

        Ok(TlsConfig {
            custom_roots,
            client_config,
        })
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Whether the configured CA list replaced the system roots
    pub fn custom_roots(&self) -> bool {
        self.custom_roots
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("custom_roots", &self.custom_roots)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

fn load_custom_ca(buffers: &[bytes::Bytes]) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    for buffer in buffers {
        let certs = pem::certificates(buffer)
            .map_err(|e| Error::Tls(format!("failed to parse CA certificate: {}", e)))?;
        let (added, ignored) = root_store.add_parsable_certificates(certs);
        if ignored > 0 {
            tracing::debug!(added, ignored, "skipped unparsable CA certificates");
        }
    }

    if root_store.is_empty() {
        return Err(Error::Tls("no valid CA certificates found".into()));
    }

    Ok(root_store)
}

fn load_system_roots() -> Result<RootCertStore> {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    for cert in result.certs {
        let _ = store.add_parsable_certificates(std::iter::once(cert));
    }

    if !result.errors.is_empty() {
        tracing::debug!(errors = result.errors.len(), "errors loading system root certificates");
    }

    if store.is_empty() {
        tracing::debug!("no system root certificates, using bundled webpki roots");
        store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
    }

    if store.is_empty() {
        return Err(Error::Tls("Failed to load any root certificates".to_string()));
    }

    Ok(store)
}
