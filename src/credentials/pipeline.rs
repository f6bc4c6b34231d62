//! Load -> parse -> validate sequencing

use super::parse::ParseOutcome;
use super::{
    CredentialLoader, CredentialParser, CredentialRequest, CredentialValidator, Credentials,
    FsLoader, KeyPairValidator, PemParser,
};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Receives non-fatal credential failures.
pub trait DiagnosticSink: Send + Sync {
    /// Report a failure the pipeline recovered from
    fn report(&self, error: &Error);
}

/// Reports through `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, error: &Error) {
        tracing::warn!(
            error = %error,
            category = error.category(),
            "failed to parse credentials, continuing with unparsed data"
        );
    }
}

/// The three credential stages plus the sink for recoverable failures.
#[derive(Clone)]
pub struct CredentialPipeline {
    pub(crate) loader: Arc<dyn CredentialLoader>,
    pub(crate) parser: Arc<dyn CredentialParser>,
    pub(crate) validator: Arc<dyn CredentialValidator>,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
}

impl Default for CredentialPipeline {
    fn default() -> Self {
        Self {
            loader: Arc::new(FsLoader),
            parser: Arc::new(PemParser),
            validator: Arc::new(KeyPairValidator),
            sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for CredentialPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPipeline").finish_non_exhaustive()
    }
}

impl CredentialPipeline {
    /// Run the stages in order.
    ///
    /// Load and validate failures are returned unchanged. A parse failure is
    /// reported to the sink and validation receives the loaded data instead.
    pub async fn run(&self, request: &CredentialRequest) -> Result<Credentials> {
        let raw = self.loader.load(request).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to load credentials");
            e
        })?;
        tracing::debug!(credentials = ?raw, "credentials loaded");

        let outcome = ParseOutcome::run(self.parser.as_ref(), raw).await;
        if let Some(error) = outcome.error() {
            crate::metrics::counters::parse_fallback();
            self.sink.report(error);
        } else {
            tracing::debug!("credentials parsed");
        }

        let validated = self
            .validator
            .validate(outcome.into_credentials())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "credential validation failed");
                e
            })?;
        tracing::debug!("credentials validated");

        Ok(validated)
    }
}
