//! Core connection type

use super::endpoint::{read_environment, resolve_address, GATEWAY_PORT};
use super::socket::{SocketFactory, SocketOptions};
use super::transport::TlsSocketFactory;
use crate::credentials::{
    CredentialLoader, CredentialParser, CredentialPipeline, CredentialRequest, CredentialSource,
    CredentialValidator, Credentials, DiagnosticSink,
};
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::Instrument;

/// Certificate loaded when neither `cert` nor `pfx` is configured
pub const DEFAULT_CERT_PATH: &str = "cert.pem";

/// Key loaded when neither `key` nor `pfx` is configured
pub const DEFAULT_KEY_PATH: &str = "key.pem";

/// Memoized credential initialization shared by every caller
pub type Initialization = Shared<BoxFuture<'static, Result<Arc<Credentials>>>>;

/// Connection configuration
///
/// Immutable once handed to a [`Connection`]. Use `ConnectionConfig::builder()`
/// or deserialize it from a configuration file.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Gateway hostname; overrides `production` and the environment
    pub address: Option<String>,
    /// Select the production (true) or sandbox (false) gateway
    pub production: Option<bool>,
    /// Gateway port (default: 2195)
    pub port: Option<u16>,
    /// Client certificate, optionally with the key in the same PEM
    pub cert: Option<CredentialSource>,
    /// Client private key
    pub key: Option<CredentialSource>,
    /// Trust anchors for the gateway certificate
    pub ca: Vec<CredentialSource>,
    /// PKCS#12 archive with certificate and key
    pub pfx: Option<CredentialSource>,
    /// Passphrase for `pfx` or an encrypted `key`
    pub passphrase: Option<String>,
}

impl ConnectionConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder()
    ///     .pfx("/etc/apn/identity.p12")
    ///     .passphrase("secret")
    ///     .production(true)
    ///     .build();
    /// ```
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Port to connect to
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(GATEWAY_PORT)
    }

    /// The sources the credential loader is asked for.
    ///
    /// Without a pfx archive, missing `cert`/`key` fall back to `cert.pem` and
    /// `key.pem`.
    pub fn credential_request(&self) -> CredentialRequest {
        let default_to = |slot: &Option<CredentialSource>, path: &str| {
            slot.clone().or_else(|| {
                if self.pfx.is_none() {
                    Some(CredentialSource::from(path))
                } else {
                    None
                }
            })
        };

        CredentialRequest {
            cert: default_to(&self.cert, DEFAULT_CERT_PATH),
            key: default_to(&self.key, DEFAULT_KEY_PATH),
            ca: self.ca.clone(),
            pfx: self.pfx.clone(),
            passphrase: self.passphrase.clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("address", &self.address)
            .field("production", &self.production)
            .field("port", &self.port)
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("ca", &self.ca)
            .field("pfx", &self.pfx)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Connect to this hostname instead of a known gateway
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = Some(address.into());
        self
    }

    /// Select the production or sandbox gateway
    pub fn production(mut self, production: bool) -> Self {
        self.config.production = Some(production);
        self
    }

    /// Override the gateway port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Set the client certificate source
    pub fn cert(mut self, source: impl Into<CredentialSource>) -> Self {
        self.config.cert = Some(source.into());
        self
    }

    /// Set the client key source
    pub fn key(mut self, source: impl Into<CredentialSource>) -> Self {
        self.config.key = Some(source.into());
        self
    }

    /// Add a trust anchor source
    pub fn ca(mut self, source: impl Into<CredentialSource>) -> Self {
        self.config.ca.push(source.into());
        self
    }

    /// Set the PKCS#12 archive source
    pub fn pfx(mut self, source: impl Into<CredentialSource>) -> Self {
        self.config.pfx = Some(source.into());
        self
    }

    /// Set the passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.config.passphrase = Some(passphrase.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Gateway connection.
///
/// The gateway address is resolved once at construction. Credentials are
/// prepared at most once per instance; a failed preparation stays failed, so
/// construct a new `Connection` to retry with fresh credentials.
pub struct Connection<F = TlsSocketFactory> {
    config: ConnectionConfig,
    address: String,
    request: Arc<CredentialRequest>,
    pipeline: Arc<CredentialPipeline>,
    factory: F,
    initialization: OnceCell<Initialization>,
}

impl Connection {
    /// Connection with the default collaborators and the current environment
    pub fn new(config: ConnectionConfig) -> Self {
        Self::builder(config).build()
    }

    /// Create a builder to replace collaborators or pin the environment
    pub fn builder(config: ConnectionConfig) -> ConnectionBuilder {
        ConnectionBuilder {
            config,
            environment: None,
            pipeline: CredentialPipeline::default(),
            factory: TlsSocketFactory::default(),
        }
    }
}

impl<F: SocketFactory> Connection<F> {
    /// Resolved gateway hostname
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Gateway port
    pub fn port(&self) -> u16 {
        self.config.port()
    }

    /// Configuration this connection was built from
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Prepare credentials.
    ///
    /// The first call creates the pipeline future; every call returns a clone
    /// of that same future, so concurrent callers share one load/parse/validate
    /// run and all observe its outcome.
    ///
    /// Inside a tokio runtime the first call also spawns the pipeline, so it
    /// runs even if the returned future is dropped unpolled. Outside a runtime
    /// it starts when the future is first polled.
    pub fn initialize(&self) -> Initialization {
        self.initialization
            .get_or_init(|| {
                let initialization = self.pipeline_future();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(initialization.clone().map(|_| ()));
                }
                initialization
            })
            .clone()
    }

    fn pipeline_future(&self) -> Initialization {
        let pipeline = self.pipeline.clone();
        let request = self.request.clone();
        let span = tracing::info_span!("initialize", address = %self.address);

        async move {
            let result = pipeline.run(&request).await.map(Arc::new);
            match &result {
                Ok(_) => {
                    crate::metrics::counters::initialization(crate::metrics::labels::OUTCOME_OK);
                    tracing::info!("credentials initialized");
                }
                Err(e) => {
                    crate::metrics::counters::initialization(
                        crate::metrics::labels::OUTCOME_ERROR,
                    );
                    tracing::warn!(error = %e, "credential initialization failed");
                }
            }
            result
        }
        .instrument(span)
        .boxed()
        .shared()
    }

    /// Establish a socket to the gateway.
    ///
    /// Waits for [`initialize`](Self::initialize); if it failed, that error is
    /// returned and no socket is constructed. Each call constructs its own
    /// socket.
    pub async fn connect(&self) -> Result<F::Socket> {
        let span = tracing::info_span!("connect", address = %self.address, port = self.port());

        async {
            crate::metrics::counters::connect_attempted();
            let result = self.establish().await;
            match &result {
                Ok(_) => crate::metrics::counters::connect_succeeded(),
                Err(e) => crate::metrics::counters::connect_failed(e.category()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn establish(&self) -> Result<F::Socket> {
        let credentials = self.initialize().await?;

        let options = SocketOptions::new(self.address.clone(), self.port(), &credentials);
        tracing::debug!(options = ?options, "creating gateway socket");

        let (tx, rx) = oneshot::channel::<Result<()>>();
        let started = Instant::now();
        let socket = self.factory.create_socket(
            options,
            Box::new(move |result: Result<()>| {
                let _ = tx.send(result);
            }),
        )?;

        rx.await.map_err(|_| Error::ConnectionClosed)??;
        crate::metrics::histograms::socket_established(started.elapsed().as_millis() as u64);
        tracing::info!("connected to gateway");

        Ok(socket)
    }
}

impl<F> std::fmt::Debug for Connection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("initialized", &self.initialization.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Connection`]
///
/// # Examples
///
/// ```ignore
/// let connection = Connection::builder(config)
///     .environment(Some("production"))
///     .diagnostics(MySink)
///     .build();
/// ```
pub struct ConnectionBuilder<F = TlsSocketFactory> {
    config: ConnectionConfig,
    environment: Option<Option<String>>,
    pipeline: CredentialPipeline,
    factory: F,
}

impl<F: SocketFactory> ConnectionBuilder<F> {
    /// Replace the credential loader
    pub fn loader(mut self, loader: impl CredentialLoader + 'static) -> Self {
        self.pipeline.loader = Arc::new(loader);
        self
    }

    /// Replace the credential parser
    pub fn parser(mut self, parser: impl CredentialParser + 'static) -> Self {
        self.pipeline.parser = Arc::new(parser);
        self
    }

    /// Replace the credential validator
    pub fn validator(mut self, validator: impl CredentialValidator + 'static) -> Self {
        self.pipeline.validator = Arc::new(validator);
        self
    }

    /// Replace the sink for non-fatal credential failures
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.pipeline.sink = sink;
        self
    }

    /// Use this environment indicator instead of reading `APN_ENV`
    pub fn environment(mut self, value: Option<&str>) -> Self {
        self.environment = Some(value.map(str::to_string));
        self
    }

    /// Replace the socket factory
    pub fn socket_factory<G: SocketFactory>(self, factory: G) -> ConnectionBuilder<G> {
        ConnectionBuilder {
            config: self.config,
            environment: self.environment,
            pipeline: self.pipeline,
            factory,
        }
    }

    /// Resolve the address and build the connection
    pub fn build(self) -> Connection<F> {
        let environment = self.environment.unwrap_or_else(read_environment);
        let address = resolve_address(&self.config, environment.as_deref());
        tracing::debug!(address = %address, "resolved gateway address");

        Connection {
            request: Arc::new(self.config.credential_request()),
            config: self.config,
            address,
            pipeline: Arc::new(self.pipeline),
            factory: self.factory,
            initialization: OnceCell::new(),
        }
    }
}
