//! Integration tests for credential initialization and socket establishment
//!
//! Every collaborator is replaced by an in-process fake, so these tests need
//! no network or credential files.

use apn_gateway::connection::{
    ConnectCallback, SocketFactory, SocketOptions, PRODUCTION_GATEWAY, SANDBOX_GATEWAY,
};
use apn_gateway::credentials::{
    CredentialLoader, CredentialParser, CredentialRequest, CredentialValidator, DiagnosticSink,
};
use apn_gateway::{Connection, ConnectionConfig, Credentials, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Loader returning fixed credentials, or a fixed error, and counting calls
struct CountingLoader {
    calls: Arc<AtomicUsize>,
    result: Result<Credentials>,
}

impl CountingLoader {
    fn ok(creds: Credentials) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                result: Ok(creds),
            },
            calls,
        )
    }

    fn failing(message: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                result: Err(Error::Load(message.into())),
            },
            calls,
        )
    }
}

#[async_trait]
impl CredentialLoader for CountingLoader {
    async fn load(&self, _request: &CredentialRequest) -> Result<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent callers really overlap with an in-flight load
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.result.clone()
    }
}

struct IdentityParser;

#[async_trait]
impl CredentialParser for IdentityParser {
    async fn parse(&self, raw: &Credentials) -> Result<Credentials> {
        Ok(raw.clone())
    }
}

struct FailingParser(&'static str);

#[async_trait]
impl CredentialParser for FailingParser {
    async fn parse(&self, _raw: &Credentials) -> Result<Credentials> {
        Err(Error::Parse(self.0.into()))
    }
}

/// Validator returning fixed output, or a validation error
enum FakeValidator {
    Returns(Credentials),
    PassThrough,
    Fails(&'static str),
}

#[async_trait]
impl CredentialValidator for FakeValidator {
    async fn validate(&self, credentials: Credentials) -> Result<Credentials> {
        match self {
            FakeValidator::Returns(creds) => Ok(creds.clone()),
            FakeValidator::PassThrough => Ok(credentials),
            FakeValidator::Fails(message) => Err(Error::Validation(message.to_string())),
        }
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

impl DiagnosticSink for RecordingSink {
    fn report(&self, error: &Error) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

/// Socket factory recording the options it was given
#[derive(Clone, Default)]
struct RecordingFactory {
    created: Arc<Mutex<Vec<SocketOptions>>>,
}

#[derive(Debug)]
struct FakeSocket(SocketOptions);

impl SocketFactory for RecordingFactory {
    type Socket = FakeSocket;

    fn create_socket(&self, options: SocketOptions, on_connect: ConnectCallback) -> Result<FakeSocket> {
        self.created.lock().unwrap().push(options.clone());
        tokio::spawn(async move { on_connect(Ok(())) });
        Ok(FakeSocket(options))
    }
}

/// Socket factory whose handshake fails or never completes
enum BrokenFactory {
    Fails,
    DropsCallback,
}

impl SocketFactory for BrokenFactory {
    type Socket = ();

    fn create_socket(&self, _options: SocketOptions, on_connect: ConnectCallback) -> Result<()> {
        match self {
            BrokenFactory::Fails => on_connect(Err(Error::Tls("handshake failed".into()))),
            BrokenFactory::DropsCallback => drop(on_connect),
        }
        Ok(())
    }
}

fn key_pair() -> Credentials {
    Credentials {
        cert: Some(Bytes::from_static(b"cert-data")),
        key: Some(Bytes::from_static(b"key-data")),
        ca: vec![Bytes::from_static(b"ca-1"), Bytes::from_static(b"ca-2")],
        pfx: None,
        passphrase: Some("secret".into()),
    }
}

fn sandbox() -> ConnectionConfig {
    ConnectionConfig::builder().production(false).build()
}

#[tokio::test]
async fn test_initialize_twice_loads_once() {
    init_tracing();
    let (loader, calls) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    let first = conn.initialize();
    let second = conn.initialize();
    let (a, b) = tokio::join!(first, second);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));

    // Settled: later calls still share the outcome
    conn.initialize().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_tasks_share_one_load() {
    let (loader, calls) = CountingLoader::ok(key_pair());
    let conn = Arc::new(
        Connection::builder(sandbox())
            .loader(loader)
            .parser(IdentityParser)
            .validator(FakeValidator::PassThrough)
            .build(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move { conn.initialize().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_caller_does_not_restart_pipeline() {
    let (loader, calls) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    // Start the pipeline, then abandon it mid-load
    let _ = tokio::time::timeout(Duration::from_millis(1), conn.initialize()).await;
    conn.initialize().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_first_initialize_starts_pipeline_unpolled() {
    let (loader, calls) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    drop(conn.initialize());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The background run already settled the shared outcome
    conn.initialize().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_initialize_returns_validated_credentials() {
    let validated = Credentials {
        cert: Some(Bytes::from_static(b"validated-cert")),
        key: Some(Bytes::from_static(b"validated-key")),
        ca: vec![Bytes::from_static(b"validated-ca")],
        pfx: None,
        passphrase: Some("validated-pass".into()),
    };
    let (loader, _) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::Returns(validated.clone()))
        .build();

    let creds = conn.initialize().await.unwrap();
    assert_eq!(*creds, validated);
}

#[tokio::test]
async fn test_parse_failure_is_reported_and_raw_data_used() {
    let sink = Arc::new(RecordingSink::default());
    let (loader, _) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(FailingParser("unable to parse certificate"))
        .validator(FakeValidator::PassThrough)
        .diagnostics(sink.clone())
        .build();

    let creds = conn.initialize().await.unwrap();
    assert_eq!(*creds, key_pair());

    let reports = sink.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("unable to parse certificate"));
}

#[tokio::test]
async fn test_validation_failure_rejects_with_message() {
    let (loader, _) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::Fails("certificate and key do not match"))
        .build();

    let err = conn.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.to_string(), "certificate and key do not match");
}

#[tokio::test]
async fn test_load_failure_rejects_with_message() {
    let (loader, _) = CountingLoader::failing("ENOENT, no such file or directory");
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    let err = conn.initialize().await.unwrap_err();
    assert_eq!(err.to_string(), "ENOENT, no such file or directory");
}

#[tokio::test]
async fn test_failed_initialization_is_permanent() {
    let (loader, calls) = CountingLoader::failing("ENOENT, no such file or directory");
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    assert!(conn.initialize().await.is_err());
    assert!(conn.initialize().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_forwards_pfx_unchanged() {
    let archive = Bytes::from_static(b"\x30\x82pkcs12-archive");
    let creds = Credentials {
        pfx: Some(archive.clone()),
        passphrase: Some("archive-pass".into()),
        ..Default::default()
    };
    let (loader, _) = CountingLoader::ok(creds);
    let factory = RecordingFactory::default();
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(factory.clone())
        .build();

    let socket = conn.connect().await.unwrap();
    assert_eq!(socket.0.pfx, Some(archive));
    assert_eq!(socket.0.passphrase.as_deref(), Some("archive-pass"));
    assert_eq!(socket.0.cert, None);
    assert_eq!(socket.0.key, None);
    assert_eq!(factory.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_connect_forwards_key_pair_unchanged() {
    let (loader, _) = CountingLoader::ok(key_pair());
    let factory = RecordingFactory::default();
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(factory.clone())
        .build();

    conn.connect().await.unwrap();

    let created = factory.created.lock().unwrap();
    let options = &created[0];
    assert_eq!(options.host, SANDBOX_GATEWAY);
    assert_eq!(options.port, 2195);
    assert_eq!(options.cert, key_pair().cert);
    assert_eq!(options.key, key_pair().key);
    assert_eq!(options.ca, key_pair().ca);
    assert_eq!(options.passphrase, key_pair().passphrase);
    assert_eq!(options.pfx, None);
}

#[tokio::test]
async fn test_connect_uses_resolved_address() {
    let (loader, _) = CountingLoader::ok(key_pair());
    let factory = RecordingFactory::default();
    let conn = Connection::builder(ConnectionConfig::default())
        .environment(Some("production"))
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(factory.clone())
        .build();

    let socket = conn.connect().await.unwrap();
    assert_eq!(socket.0.host, PRODUCTION_GATEWAY);
}

#[tokio::test]
async fn test_connect_after_failed_initialize_creates_no_socket() {
    let (loader, _) = CountingLoader::failing("ENOENT, no such file or directory");
    let factory = RecordingFactory::default();
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(factory.clone())
        .build();

    let err = conn.connect().await.unwrap_err();
    assert_eq!(err.to_string(), "ENOENT, no such file or directory");
    assert!(factory.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_each_connect_builds_a_socket_from_one_initialization() {
    let (loader, calls) = CountingLoader::ok(key_pair());
    let factory = RecordingFactory::default();
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(factory.clone())
        .build();

    let (a, b) = tokio::join!(conn.connect(), conn.connect());
    a.unwrap();
    b.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_connect_surfaces_callback_error() {
    let (loader, _) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(BrokenFactory::Fails)
        .build();

    let err = conn.connect().await.unwrap_err();
    assert_eq!(err.to_string(), "TLS error: handshake failed");
}

#[tokio::test]
async fn test_connect_dropped_callback_is_connection_closed() {
    let (loader, _) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .socket_factory(BrokenFactory::DropsCallback)
        .build();

    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[test]
fn test_initialize_from_blocking_context() {
    let (loader, calls) = CountingLoader::ok(key_pair());
    let conn = Connection::builder(sandbox())
        .loader(loader)
        .parser(IdentityParser)
        .validator(FakeValidator::PassThrough)
        .build();

    let creds = tokio_test::block_on(conn.initialize()).unwrap();
    assert_eq!(*creds, key_pair());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
