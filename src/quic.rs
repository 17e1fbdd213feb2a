use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::RwLock;
use quinn::{
    ClientConfig, Connection, Endpoint, IdleTimeout, TransportConfig, VarInt,
    crypto::rustls::QuicClientConfig,
};
use rustls::{
    DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio::{sync::Mutex, task::JoinHandle};

pub type DataHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Largest buffer accepted from a single inbound stream. The peer
/// sends one message per stream, so anything bigger than a few media
/// packets is a protocol violation.
const MAX_MESSAGE_SIZE: usize = 65536;

#[derive(Debug)]
pub enum TransportError {
    InitFailure(String),
    ConnectFailure(String),
    SendFailure(String),
    /// The adapter is stopped or was never connected.
    Closed,
}

impl std::error::Error for TransportError {}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unregistered,
    Configured,
    Connecting,
    Connected,
    Closed,
}

pub struct QuicClientOptions {
    pub server: SocketAddr,
    pub server_name: String,
    pub alpn: String,
    pub idle_timeout: Duration,
    pub peer_stream_limit: u32,
    pub ca: Option<String>,
    pub insecure_skip_verify: bool,
}

struct Inner {
    state: State,
    endpoint: Option<Endpoint>,
    connection: Option<Connection>,
    task: Option<JoinHandle<()>>,
}

/// The outbound QUIC side of the gateway.
///
/// One connection to one fixed peer, owned by this instance and never
/// shared as ambient state; every operation that touches the
/// connection handle is serialized behind a single mutex so a handle
/// cannot be used mid teardown. Sends open one unidirectional stream
/// per message, fire and forget; receives deliver one complete buffer
/// per inbound stream to the registered handler.
pub struct QuicClient {
    options: QuicClientOptions,
    handler: Arc<RwLock<Option<DataHandler>>>,
    inner: Mutex<Inner>,
}

impl QuicClient {
    pub fn new(options: QuicClientOptions) -> Self {
        Self {
            options,
            handler: Arc::new(RwLock::new(None)),
            inner: Mutex::new(Inner {
                state: State::Unregistered,
                endpoint: None,
                connection: None,
                task: None,
            }),
        }
    }

    /// Register the inbound data handler, replacing any previous one.
    pub fn set_data_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.handler.write().replace(Box::new(handler));
    }

    /// Build the client endpoint and its configuration: ALPN, idle
    /// timeout, peer stream limit and credentials.
    ///
    /// A failure in any sub step leaves the adapter unregistered.
    pub async fn initialize(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Unregistered {
            return Err(TransportError::InitFailure(
                "adapter is already configured".to_string(),
            ));
        }

        let crypto = QuicClientConfig::try_from(self.build_crypto()?)
            .map_err(|e| TransportError::InitFailure(e.to_string()))?;

        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(
            IdleTimeout::try_from(self.options.idle_timeout)
                .map_err(|e| TransportError::InitFailure(e.to_string()))?,
        ));

        transport.max_concurrent_uni_streams(VarInt::from_u32(self.options.peer_stream_limit));

        let mut config = ClientConfig::new(Arc::new(crypto));
        config.transport_config(Arc::new(transport));

        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())
            .map_err(|e| TransportError::InitFailure(e.to_string()))?;
        endpoint.set_default_client_config(config);

        inner.endpoint = Some(endpoint);
        inner.state = State::Configured;

        Ok(())
    }

    fn build_crypto(&self) -> Result<rustls::ClientConfig, TransportError> {
        let builder = rustls::ClientConfig::builder();

        let mut config = if self.options.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            if let Some(path) = &self.options.ca {
                let pem = std::fs::read(path)
                    .map_err(|e| TransportError::InitFailure(e.to_string()))?;

                for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                    roots
                        .add(cert.map_err(|e| TransportError::InitFailure(e.to_string()))?)
                        .map_err(|e| TransportError::InitFailure(e.to_string()))?;
                }
            }

            builder.with_root_certificates(roots).with_no_client_auth()
        };

        config.alpn_protocols = vec![self.options.alpn.as_bytes().to_vec()];

        Ok(config)
    }

    /// Open the connection to the configured peer and start the
    /// inbound stream loop.
    ///
    /// On failure the half opened handle is released and the adapter
    /// stays configured, the caller decides whether to retry.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Configured {
            return Err(TransportError::ConnectFailure(
                "adapter is not configured".to_string(),
            ));
        }

        let Some(endpoint) = inner.endpoint.clone() else {
            return Err(TransportError::ConnectFailure(
                "endpoint is gone".to_string(),
            ));
        };

        inner.state = State::Connecting;

        let connection = match endpoint.connect(self.options.server, &self.options.server_name) {
            Ok(connecting) => match connecting.await {
                Ok(it) => it,
                Err(e) => {
                    inner.state = State::Configured;
                    return Err(TransportError::ConnectFailure(e.to_string()));
                }
            },
            Err(e) => {
                inner.state = State::Configured;
                return Err(TransportError::ConnectFailure(e.to_string()));
            }
        };

        log::info!("quic connection established: peer={}", self.options.server);

        inner.task = Some(tokio::spawn(receive_loop(
            connection.clone(),
            self.handler.clone(),
        )));

        inner.connection = Some(connection);
        inner.state = State::Connected;

        Ok(())
    }

    /// Send one message to the peer.
    ///
    /// Every call opens a new unidirectional stream, writes the whole
    /// buffer and finishes the stream. No backpressure is surfaced
    /// beyond the error.
    pub async fn send_data(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let inner = self.inner.lock().await;
        let connection = match (inner.state, &inner.connection) {
            (State::Connected, Some(it)) => it,
            _ => return Err(TransportError::Closed),
        };

        let mut stream = connection
            .open_uni()
            .await
            .map_err(|e| TransportError::SendFailure(e.to_string()))?;

        stream
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::SendFailure(e.to_string()))?;

        stream
            .finish()
            .map_err(|e| TransportError::SendFailure(e.to_string()))?;

        log::trace!("quic stream send: size={}", bytes.len());

        Ok(())
    }

    /// Close the connection and the endpoint exactly once. Repeated
    /// calls are no-ops.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == State::Closed {
            return;
        }

        if let Some(task) = inner.task.take() {
            task.abort();
        }

        if let Some(connection) = inner.connection.take() {
            connection.close(VarInt::from_u32(0), b"shutdown");
        }

        if let Some(endpoint) = inner.endpoint.take() {
            endpoint.close(VarInt::from_u32(0), b"shutdown");
        }

        inner.state = State::Closed;
        log::info!("quic client stopped");
    }
}

/// quic stream process task.
///
/// Accepts unidirectional streams from the peer and delivers each
/// stream's complete buffer to the registered handler. One message
/// per stream, matching the send side; there is no further framing.
async fn receive_loop(connection: Connection, handler: Arc<RwLock<Option<DataHandler>>>) {
    loop {
        let mut stream = match connection.accept_uni().await {
            Ok(it) => it,
            Err(e) => {
                log::info!("quic connection closed: reason={}", e);
                break;
            }
        };

        match stream.read_to_end(MAX_MESSAGE_SIZE).await {
            Ok(buf) => {
                log::trace!("quic stream receive: size={}", buf.len());

                if let Some(handler) = handler.read().as_ref() {
                    handler(&buf);
                } else {
                    log::warn!("no data handler registered, dropping buffer: size={}", buf.len());
                }
            }
            Err(e) => {
                log::warn!("quic stream receive failed: error={}", e);
            }
        }
    }
}

/// Certificate verifier that accepts any peer.
///
/// Installed only when `insecure-skip-verify` is set in the
/// configuration, for closed test networks without a CA.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Self {
        Self(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
    }
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
