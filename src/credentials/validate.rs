//! Certificate/key consistency validation

use super::pem;
use super::{CredentialValidator, Credentials};
use crate::{Error, Result};
use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use std::sync::Arc;

/// Checks that a discrete certificate and key belong together.
///
/// A pfx-only identity is accepted as is; its contents are checked during the
/// handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPairValidator;

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

#[async_trait]
impl CredentialValidator for KeyPairValidator {
    async fn validate(&self, credentials: Credentials) -> Result<Credentials> {
        let (cert, key) = match (credentials.cert.clone(), credentials.key.clone()) {
            (Some(cert), Some(key)) if credentials.has_key_pair() => (cert, key),
            _ if credentials.has_pfx() => return Ok(credentials),
            _ => {
                return Err(Error::Validation(
                    "a certificate and private key, or a pfx archive, are required".into(),
                ))
            }
        };

        let chain = pem::certificates(&cert)
            .map_err(|e| Error::Validation(format!("unable to read certificate: {}", e)))?;
        if chain.is_empty() {
            return Err(Error::Validation("no certificate found".into()));
        }

        let key = pem::private_key(&key)
            .map_err(|e| Error::Validation(format!("unable to read private key: {}", e)))?
            .ok_or_else(|| {
                if credentials.passphrase.is_some() {
                    Error::Validation("no usable private key found; encrypted keys are not supported".into())
                } else {
                    Error::Validation("no private key found".into())
                }
            })?;

        let signing_key = crypto_provider()
            .key_provider
            .load_private_key(key)
            .map_err(|e| Error::Validation(format!("unsupported private key: {}", e)))?;

        match CertifiedKey::new(chain, signing_key).keys_match() {
            // Unknown: the key type cannot expose its public half; defer to the handshake
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
                Ok(credentials)
            }
            Err(_) => Err(Error::Validation(
                "certificate and key do not match".into(),
            )),
        }
    }
}
