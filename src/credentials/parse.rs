//! PEM credential parser

use super::pem::{self, BlockKind, PemBlock};
use super::{CredentialParser, Credentials};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

/// Result of the parse stage.
///
/// A failed parse keeps the raw buffers so the pipeline can continue with them.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// Parser succeeded
    Parsed(Credentials),
    /// Parser failed; `raw` is the loaded data
    Unparsed {
        /// Loaded buffers, unchanged
        raw: Credentials,
        /// Why parsing failed
        error: Error,
    },
}

impl ParseOutcome {
    /// Run `parser` over `raw`, keeping `raw` on failure
    pub async fn run(parser: &dyn CredentialParser, raw: Credentials) -> Self {
        match parser.parse(&raw).await {
            Ok(parsed) => ParseOutcome::Parsed(parsed),
            Err(error) => ParseOutcome::Unparsed { raw, error },
        }
    }

    /// The parse failure, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::Unparsed { error, .. } => Some(error),
        }
    }

    /// Credentials usable by the validation stage, parsed or not
    pub fn into_credentials(self) -> Credentials {
        match self {
            ParseOutcome::Parsed(creds) => creds,
            ParseOutcome::Unparsed { raw, .. } => raw,
        }
    }
}

/// Separates PEM certificates from PEM keys.
///
/// * A certificate buffer that also carries the key yields both.
/// * CA bundles are split into one buffer per certificate.
/// * DER buffers, `pfx` and `passphrase` pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PemParser;

impl PemParser {
    fn blocks(slot: &str, data: &Bytes) -> Result<Vec<PemBlock>> {
        pem::blocks(data)
            .map_err(|e| Error::Parse(format!("unable to parse {} PEM: {}", slot, e)))
    }

    fn join(blocks: &[&PemBlock]) -> Bytes {
        let mut out = BytesMut::new();
        for block in blocks {
            out.extend_from_slice(&block.bytes);
        }
        out.freeze()
    }
}

#[async_trait]
impl CredentialParser for PemParser {
    async fn parse(&self, raw: &Credentials) -> Result<Credentials> {
        let mut parsed = Credentials {
            pfx: raw.pfx.clone(),
            passphrase: raw.passphrase.clone(),
            ..Default::default()
        };

        let mut key_from_cert = None;
        if let Some(cert) = &raw.cert {
            if pem::is_pem(cert) {
                let blocks = Self::blocks("certificate", cert)?;
                let certs: Vec<_> = blocks
                    .iter()
                    .filter(|b| b.kind == BlockKind::Certificate)
                    .collect();
                if certs.is_empty() {
                    return Err(Error::Parse(
                        "no certificate found in certificate data".into(),
                    ));
                }
                parsed.cert = Some(Self::join(&certs));
                key_from_cert = blocks
                    .iter()
                    .find(|b| b.kind == BlockKind::PrivateKey)
                    .map(|b| b.bytes.clone());
            } else {
                parsed.cert = Some(cert.clone());
            }
        }

        parsed.key = match &raw.key {
            Some(key) if pem::is_pem(key) => {
                let blocks = Self::blocks("key", key)?;
                let found = blocks
                    .into_iter()
                    .find(|b| b.kind == BlockKind::PrivateKey)
                    .ok_or_else(|| Error::Parse("no private key found in key data".into()))?;
                Some(found.bytes)
            }
            Some(key) => Some(key.clone()),
            None => key_from_cert,
        };

        for ca in &raw.ca {
            if !pem::is_pem(ca) {
                parsed.ca.push(ca.clone());
                continue;
            }
            let before = parsed.ca.len();
            parsed.ca.extend(
                Self::blocks("CA", ca)?
                    .into_iter()
                    .filter(|b| b.kind == BlockKind::Certificate)
                    .map(|b| b.bytes),
            );
            if parsed.ca.len() == before {
                return Err(Error::Parse("no certificate found in CA data".into()));
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::pem::fixtures::*;
    use super::*;

    fn bytes(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[tokio::test]
    async fn test_separates_combined_cert_and_key() {
        let raw = Credentials {
            cert: Some(bytes(&format!("{}{}", CERT_PEM, KEY_PEM))),
            ..Default::default()
        };

        let parsed = PemParser.parse(&raw).await.unwrap();
        assert_eq!(parsed.cert, Some(bytes(CERT_PEM)));
        assert_eq!(parsed.key, Some(bytes(KEY_PEM)));
    }

    #[tokio::test]
    async fn test_explicit_key_wins_over_embedded_key() {
        let other_key = KEY_PEM.replace("MIIBAQ==", "MIIBAw==");
        let raw = Credentials {
            cert: Some(bytes(&format!("{}{}", CERT_PEM, KEY_PEM))),
            key: Some(bytes(&other_key)),
            ..Default::default()
        };

        let parsed = PemParser.parse(&raw).await.unwrap();
        assert_eq!(parsed.key, Some(bytes(&other_key)));
    }

    #[tokio::test]
    async fn test_splits_ca_bundle() {
        let raw = Credentials {
            ca: vec![bytes(&format!("{}{}", CA_PEM, CERT_PEM))],
            ..Default::default()
        };

        let parsed = PemParser.parse(&raw).await.unwrap();
        assert_eq!(parsed.ca, vec![bytes(CA_PEM), bytes(CERT_PEM)]);
    }

    #[tokio::test]
    async fn test_der_and_pfx_pass_through() {
        let raw = Credentials {
            cert: Some(Bytes::from_static(&[0x30, 0x01])),
            pfx: Some(Bytes::from_static(&[0x30, 0x02])),
            passphrase: Some("secret".into()),
            ..Default::default()
        };

        let parsed = PemParser.parse(&raw).await.unwrap();
        assert_eq!(parsed, raw);
    }

    #[tokio::test]
    async fn test_key_data_without_key_fails() {
        let raw = Credentials {
            cert: Some(bytes(CERT_PEM)),
            key: Some(bytes(CERT_PEM)),
            ..Default::default()
        };

        let err = PemParser.parse(&raw).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("no private key"));
    }

    #[tokio::test]
    async fn test_outcome_falls_back_to_raw() {
        let raw = Credentials {
            key: Some(bytes(CERT_PEM)),
            ..Default::default()
        };

        let outcome = ParseOutcome::run(&PemParser, raw.clone()).await;
        assert!(outcome.error().is_some());
        assert_eq!(outcome.into_credentials(), raw);
    }
}
