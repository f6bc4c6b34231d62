//! File-system credential loader

use super::{CredentialLoader, CredentialRequest, CredentialSource, Credentials};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Loads path sources with `tokio::fs` and passes in-memory sources through.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl FsLoader {
    async fn read(source: &CredentialSource) -> Result<Bytes> {
        match source {
            CredentialSource::Data(data) => Ok(data.clone()),
            CredentialSource::Path(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    Error::Load(format!(
                        "failed to read credential file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::debug!(path = %path.display(), bytes = data.len(), "read credential file");
                Ok(Bytes::from(data))
            }
        }
    }

    async fn read_opt(source: Option<&CredentialSource>) -> Result<Option<Bytes>> {
        match source {
            Some(source) => Ok(Some(Self::read(source).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialLoader for FsLoader {
    async fn load(&self, request: &CredentialRequest) -> Result<Credentials> {
        let pfx = Self::read_opt(request.pfx.as_ref()).await?;
        let cert = Self::read_opt(request.cert.as_ref()).await?;
        let key = Self::read_opt(request.key.as_ref()).await?;

        let mut ca = Vec::with_capacity(request.ca.len());
        for source in &request.ca {
            ca.push(Self::read(source).await?);
        }

        Ok(Credentials {
            cert,
            key,
            ca,
            pfx,
            passphrase: request.passphrase.clone(),
        })
    }
}
