//! Credential pipeline
//!
//! This module handles:
//! * Credential source descriptors (file paths or in-memory buffers)
//! * The load -> parse -> validate collaborator traits
//! * Default file-system, PEM and key-pair implementations
//! * The pipeline that sequences the stages and classifies their failures

mod load;
mod parse;
pub(crate) mod pem;
mod pipeline;
mod validate;

pub use load::FsLoader;
pub use parse::{ParseOutcome, PemParser};
pub use pipeline::{CredentialPipeline, DiagnosticSink, TracingSink};
pub use validate::KeyPairValidator;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Where a credential slot gets its bytes from.
///
/// In serialized configuration a string is read as a path and a byte array as
/// inline data.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CredentialSource {
    /// File to read at load time
    Path(PathBuf),
    /// Data already in memory
    Data(Bytes),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Data(data) => write!(f, "Data(<{} bytes>)", data.len()),
        }
    }
}

impl From<&str> for CredentialSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for CredentialSource {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for CredentialSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Bytes> for CredentialSource {
    fn from(data: Bytes) -> Self {
        Self::Data(data)
    }
}

impl From<Vec<u8>> for CredentialSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Data(Bytes::from(data))
    }
}

/// What the loader is asked to produce, one source per credential slot.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Client certificate (or combined cert + key PEM)
    pub cert: Option<CredentialSource>,
    /// Client private key
    pub key: Option<CredentialSource>,
    /// Trust anchors for the gateway certificate
    pub ca: Vec<CredentialSource>,
    /// PKCS#12 archive holding both certificate and key
    pub pfx: Option<CredentialSource>,
    /// Passphrase for `pfx` or an encrypted `key`
    pub passphrase: Option<String>,
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("ca", &self.ca)
            .field("pfx", &self.pfx)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Credential material flowing through the pipeline.
///
/// The loader produces raw buffers in this shape, the parser returns a
/// separated version of it, and the validator's output is what the socket
/// layer receives. Buffers may be PEM or DER.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Client certificate chain
    pub cert: Option<Bytes>,
    /// Client private key
    pub key: Option<Bytes>,
    /// Trust anchors, one buffer per entry
    pub ca: Vec<Bytes>,
    /// PKCS#12 archive
    pub pfx: Option<Bytes>,
    /// Passphrase for `pfx` or `key`
    pub passphrase: Option<String>,
}

impl Credentials {
    /// Whether a discrete certificate and key are both present
    pub fn has_key_pair(&self) -> bool {
        non_empty(&self.cert) && non_empty(&self.key)
    }

    /// Whether a PKCS#12 archive is present
    pub fn has_pfx(&self) -> bool {
        non_empty(&self.pfx)
    }
}

fn non_empty(buf: &Option<Bytes>) -> bool {
    buf.as_ref().is_some_and(|b| !b.is_empty())
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = |b: &Option<Bytes>| b.as_ref().map(Bytes::len);
        f.debug_struct("Credentials")
            .field("cert_len", &len(&self.cert))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("ca_count", &self.ca.len())
            .field("pfx_len", &len(&self.pfx))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reads credential sources into raw buffers.
///
/// Failure is fatal to initialization and surfaces unchanged.
#[async_trait]
pub trait CredentialLoader: Send + Sync {
    /// Load every source named in `request`
    async fn load(&self, request: &CredentialRequest) -> Result<Credentials>;
}

/// Interprets raw buffers into separated credential material.
///
/// Failure is not fatal: the pipeline reports it and continues with the raw
/// buffers.
#[async_trait]
pub trait CredentialParser: Send + Sync {
    /// Parse loaded buffers
    async fn parse(&self, raw: &Credentials) -> Result<Credentials>;
}

/// Cross-checks credential material before it is used for a handshake.
///
/// Failure is fatal to initialization and surfaces unchanged.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Validate and return the credentials that passed
    async fn validate(&self, credentials: Credentials) -> Result<Credentials>;
}
