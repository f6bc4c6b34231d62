//! rustls-backed gateway sockets

use super::socket::{ConnectCallback, SocketFactory, SocketOptions};
use super::state::SocketState;
use super::tls::TlsConfig;
use crate::{Error, Result};
use rustls_pki_types::ServerName;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

/// Established TLS stream to the gateway
pub type GatewayStream = tokio_rustls::client::TlsStream<TcpStream>;

const EVENT_CAPACITY: usize = 16;

/// Events published by a [`TlsSocket`]
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Handshake completed
    Connected,
    /// Connect or handshake failed
    Error(Error),
    /// Socket was closed
    Closed,
}

/// Builds [`TlsSocket`]s with rustls.
#[derive(Debug, Clone, Default)]
pub struct TlsSocketFactory {
    connect_timeout: Option<Duration>,
}

impl TlsSocketFactory {
    /// Factory with no connect timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for advanced configuration
    pub fn builder() -> TlsSocketFactoryBuilder {
        TlsSocketFactoryBuilder::default()
    }

    /// Configured connect timeout
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }
}

/// Builder for [`TlsSocketFactory`]
#[derive(Debug, Clone, Default)]
pub struct TlsSocketFactoryBuilder {
    connect_timeout: Option<Duration>,
}

impl TlsSocketFactoryBuilder {
    /// Limit TCP connect plus TLS handshake
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Build the factory
    pub fn build(self) -> TlsSocketFactory {
        TlsSocketFactory {
            connect_timeout: self.connect_timeout,
        }
    }
}

impl SocketFactory for TlsSocketFactory {
    type Socket = TlsSocket;

    fn create_socket(&self, options: SocketOptions, on_connect: ConnectCallback) -> Result<TlsSocket> {
        let tls = TlsConfig::from_options(&options)?;
        let server_name = server_name(&options.host)?;
        tracing::debug!(
            host = %options.host,
            custom_roots = tls.custom_roots(),
            "compiled TLS configuration"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            state: Mutex::new(SocketState::Connecting),
            stream: tokio::sync::Mutex::new(None),
            events,
        });

        let task = tokio::spawn(establish(
            inner.clone(),
            options.host,
            options.port,
            server_name,
            TlsConnector::from(tls.client_config()),
            self.connect_timeout,
            on_connect,
        ));

        Ok(TlsSocket {
            inner,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Name presented for SNI and certificate verification: a DNS name or an IP
/// literal, with any trailing dot removed.
fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.trim_end_matches('.').to_string())
        .map_err(|_| Error::Config(format!("Invalid hostname for TLS: '{}'", host)))
}

struct Inner {
    state: Mutex<SocketState>,
    stream: tokio::sync::Mutex<Option<GatewayStream>>,
    events: broadcast::Sender<SocketEvent>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `Closed` unless already there; true if this call closed it
    fn mark_closed(&self) -> bool {
        let mut state = self.state();
        if *state == SocketState::Closed {
            return false;
        }
        *state = SocketState::Closed;
        true
    }

    fn publish(&self, event: SocketEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn establish(
    inner: Arc<Inner>,
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    connect_timeout: Option<Duration>,
    on_connect: ConnectCallback,
) {
    let attempt = async {
        let tcp = TcpStream::connect((host.as_str(), port)).await?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;
        Ok::<GatewayStream, Error>(stream)
    };

    let result = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or(Err(Error::Timeout)),
        None => attempt.await,
    };

    match result {
        Ok(stream) => {
            *inner.stream.lock().await = Some(stream);
            let transitioned = inner.state().transition(SocketState::Connected);
            if let Err(e) = transitioned {
                on_connect(Err(e));
                return;
            }
            tracing::info!(host = %host, port, "gateway socket connected");
            inner.publish(SocketEvent::Connected);
            on_connect(Ok(()));
        }
        Err(e) => {
            tracing::warn!(host = %host, port, error = %e, "failed to establish gateway socket");
            inner.mark_closed();
            inner.publish(SocketEvent::Error(e.clone()));
            on_connect(Err(e));
        }
    }
}

/// Handle to a gateway socket.
///
/// Events can be observed repeatedly through [`subscribe`](Self::subscribe) or
/// once through [`once`](Self::once). Higher layers take the established
/// stream with [`take_stream`](Self::take_stream).
pub struct TlsSocket {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TlsSocket {
    /// Current socket state
    pub fn state(&self) -> SocketState {
        *self.inner.state()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve with the next event published after this call
    pub fn once(&self) -> impl Future<Output = Option<SocketEvent>> + Send + 'static {
        let mut events = self.inner.events.subscribe();
        async move { events.recv().await.ok() }
    }

    /// Take the established TLS stream.
    ///
    /// Returns `None` before the handshake completes or once taken.
    pub async fn take_stream(&self) -> Option<GatewayStream> {
        self.inner.stream.lock().await.take()
    }

    /// Close the socket, aborting a handshake still in progress.
    pub async fn close(&self) -> Result<()> {
        if let Some(task) = self.take_task() {
            task.abort();
        }

        let stream = self.inner.stream.lock().await.take();
        // The aborted task may still settle the state first
        if self.inner.mark_closed() {
            self.inner.publish(SocketEvent::Closed);
            tracing::debug!("gateway socket closed");
        }

        if let Some(mut stream) = stream {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for TlsSocket {
    fn drop(&mut self) {
        if let Some(task) = self.take_task() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
