//! Persistent TLS connections to the push gateway.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::certificate::Certificate;
use crate::error::GatewayError;
use crate::error_tuple::ERROR_TUPLE_BYTES;

/// A single connection to the gateway, bound to one certificate.
///
/// Implementations only surface raw bytes or their absence; classifying the
/// delivery outcome is the caller's job.
#[async_trait]
pub trait GatewayConnection: Send {
    /// Open the encrypted channel.
    async fn connect(&mut self) -> Result<(), GatewayError>;

    /// Tear down and re-open. Safe to call repeatedly.
    async fn reconnect(&mut self) -> Result<(), GatewayError>;

    /// Write one outbound notification frame.
    async fn send(&mut self, payload: &[u8]) -> Result<(), GatewayError>;

    /// Wait up to `timeout` for the error channel to become readable.
    /// End-of-stream counts as readable. Nothing is consumed.
    async fn poll_for_error(&mut self, timeout: Duration) -> Result<bool, GatewayError>;

    /// Read exactly one error tuple. `None` means the gateway closed the
    /// connection instead of sending one.
    async fn read_error_tuple(&mut self) -> Result<Option<[u8; ERROR_TUPLE_BYTES]>, GatewayError>;

    /// Release the socket. Idempotent.
    async fn close(&mut self);
}

/// Builds unconnected gateway connections for a worker.
pub trait Connector: Send + Sync + 'static {
    type Connection: GatewayConnection + 'static;

    fn build(
        &self,
        worker: &str,
        certificate: &Certificate,
    ) -> Result<Self::Connection, GatewayError>;
}

/// Connector for the real gateway over TLS.
#[derive(Clone)]
pub struct GatewayConnector {
    host: String,
    port: u16,
    roots: Arc<RootCertStore>,
}

impl GatewayConnector {
    /// Trusts the webpki roots.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self {
            host: host.into(),
            port,
            roots: Arc::new(roots),
        }
    }

    /// Additionally trust every certificate in the PEM file at `path`.
    pub fn with_extra_roots(mut self, path: &Path) -> Result<Self, GatewayError> {
        let pem = std::fs::read(path).map_err(|e| {
            GatewayError::Certificate(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut roots = (*self.roots).clone();
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| GatewayError::Certificate(e.to_string()))?;
            roots
                .add(cert)
                .map_err(|e| GatewayError::Certificate(e.to_string()))?;
        }

        tracing::info!(
            path = %path.display(),
            roots = roots.len(),
            "Loaded additional gateway trust anchors"
        );
        self.roots = Arc::new(roots);
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn client_config(&self, certificate: &Certificate) -> Result<ClientConfig, GatewayError> {
        let (chain, key) = certificate.credentials()?;

        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| GatewayError::Certificate(e.to_string()))?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(chain, key)
            .map_err(|e| GatewayError::Certificate(e.to_string()))
    }
}

impl Connector for GatewayConnector {
    type Connection = TlsGatewayConnection;

    fn build(
        &self,
        worker: &str,
        certificate: &Certificate,
    ) -> Result<TlsGatewayConnection, GatewayError> {
        let config = self.client_config(certificate)?;
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| GatewayError::Certificate(format!("invalid gateway host: {e}")))?;

        Ok(TlsGatewayConnection {
            name: worker.to_string(),
            host: self.host.clone(),
            port: self.port,
            certificate: certificate.clone(),
            server_name,
            tls: TlsConnector::from(Arc::new(config)),
            stream: None,
        })
    }
}

/// Gateway connection over TLS. Reads go through a buffer so the error
/// channel can be polled without consuming anything.
pub struct TlsGatewayConnection {
    name: String,
    host: String,
    port: u16,
    certificate: Certificate,
    server_name: ServerName<'static>,
    tls: TlsConnector,
    stream: Option<BufReader<TlsStream<TcpStream>>>,
}

impl TlsGatewayConnection {
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut BufReader<TlsStream<TcpStream>>, GatewayError> {
        self.stream.as_mut().ok_or(GatewayError::NotConnected)
    }
}

#[async_trait]
impl GatewayConnection for TlsGatewayConnection {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| GatewayError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            })?;
        tcp.set_nodelay(true).map_err(|source| GatewayError::Connect {
            host: self.host.clone(),
            port: self.port,
            source,
        })?;

        let stream = self
            .tls
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|source| GatewayError::Handshake {
                host: self.host.clone(),
                source,
            })?;

        self.stream = Some(BufReader::new(stream));
        tracing::info!(
            worker = %self.name,
            host = %self.host,
            port = self.port,
            certificate = %self.certificate,
            "Connected to gateway"
        );
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), GatewayError> {
        tracing::info!(worker = %self.name, host = %self.host, "Reconnecting to gateway");
        self.close().await;
        self.connect().await
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        let stream = self.stream()?;
        stream.write_all(payload).await.map_err(GatewayError::Write)?;
        stream.flush().await.map_err(GatewayError::Write)
    }

    async fn poll_for_error(&mut self, timeout: Duration) -> Result<bool, GatewayError> {
        let stream = self.stream()?;
        match tokio::time::timeout(timeout, stream.fill_buf()).await {
            Err(_elapsed) => Ok(false),
            // Data, EOF and read errors all mean the next read will not block.
            Ok(_) => Ok(true),
        }
    }

    async fn read_error_tuple(&mut self) -> Result<Option<[u8; ERROR_TUPLE_BYTES]>, GatewayError> {
        let stream = self.stream()?;
        let mut tuple = [0u8; ERROR_TUPLE_BYTES];
        match stream.read_exact(&mut tuple).await {
            Ok(_) => Ok(Some(tuple)),
            Err(e) => {
                tracing::debug!(worker = %self.name, error = %e, "Gateway closed the connection");
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                tracing::debug!(worker = %self.name, error = %e, "Error while closing gateway socket");
            }
            tracing::info!(worker = %self.name, host = %self.host, "Gateway connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rustls::ServerConfig;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::net::TcpListener;
    use tokio_rustls::{TlsAcceptor, server};

    use super::*;

    const WINDOW: Duration = Duration::from_secs(5);
    const TUPLE: [u8; ERROR_TUPLE_BYTES] = [8, 7, 0, 0, 0, 9];

    /// How the loopback gateway answers the first frame on a connection.
    #[derive(Debug, Clone, Copy)]
    enum Answer {
        Tuple,
        Truncated,
        Hangup,
        Silence,
    }

    struct LoopbackGateway {
        connector: GatewayConnector,
        certificate: Certificate,
        accepted: Arc<AtomicUsize>,
    }

    impl LoopbackGateway {
        async fn connected(&self) -> TlsGatewayConnection {
            let mut connection = self
                .connector
                .build("DeliveryWorker 0", &self.certificate)
                .unwrap();
            connection.connect().await.unwrap();
            connection
        }
    }

    fn ring() -> Arc<rustls::crypto::CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    async fn loopback_gateway(answer: Answer) -> LoopbackGateway {
        let server = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server.key_pair.serialize_der()));
        let config = ServerConfig::builder_with_provider(ring())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![server.cert.der().clone()], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(tcp).await {
                        answer_first_frame(stream, answer).await;
                    }
                });
            }
        });

        let mut roots = RootCertStore::empty();
        roots.add(server.cert.der().clone()).unwrap();
        let client = rcgen::generate_simple_self_signed(vec!["pushgate-test".to_string()]).unwrap();

        LoopbackGateway {
            connector: GatewayConnector {
                host: "localhost".to_string(),
                port,
                roots: Arc::new(roots),
            },
            certificate: Certificate::new(format!(
                "{}{}",
                client.cert.pem(),
                client.key_pair.serialize_pem()
            )),
            accepted,
        }
    }

    async fn answer_first_frame(mut stream: server::TlsStream<TcpStream>, answer: Answer) {
        let mut frame = [0u8; 256];
        if !matches!(stream.read(&mut frame).await, Ok(n) if n > 0) {
            return;
        }

        match answer {
            Answer::Tuple => {
                let _ = stream.write_all(&TUPLE).await;
                let _ = stream.flush().await;
            }
            Answer::Truncated => {
                let _ = stream.write_all(&TUPLE[..3]).await;
                let _ = stream.shutdown().await;
                return;
            }
            Answer::Hangup => {
                let _ = stream.shutdown().await;
                return;
            }
            Answer::Silence => {}
        }

        // Hold the connection open until the client goes away.
        while matches!(stream.read(&mut frame).await, Ok(n) if n > 0) {}
    }

    #[tokio::test]
    async fn test_tls_error_tuple_is_read_whole() {
        let gateway = loopback_gateway(Answer::Tuple).await;
        let mut connection = gateway.connected().await;

        connection.send(b"frame").await.unwrap();
        assert!(connection.poll_for_error(WINDOW).await.unwrap());
        // Polling leaves the tuple in place for the read.
        assert!(connection.poll_for_error(WINDOW).await.unwrap());
        assert_eq!(connection.read_error_tuple().await.unwrap(), Some(TUPLE));
    }

    #[tokio::test]
    async fn test_tls_truncated_tuple_reads_as_closed() {
        let gateway = loopback_gateway(Answer::Truncated).await;
        let mut connection = gateway.connected().await;

        connection.send(b"frame").await.unwrap();
        assert!(connection.poll_for_error(WINDOW).await.unwrap());
        assert_eq!(connection.read_error_tuple().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tls_hangup_is_readable_and_reads_as_closed() {
        let gateway = loopback_gateway(Answer::Hangup).await;
        let mut connection = gateway.connected().await;

        connection.send(b"frame").await.unwrap();
        assert!(connection.poll_for_error(WINDOW).await.unwrap());
        assert_eq!(connection.read_error_tuple().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tls_silence_times_out() {
        let gateway = loopback_gateway(Answer::Silence).await;
        let mut connection = gateway.connected().await;

        connection.send(b"frame").await.unwrap();
        assert!(
            !connection
                .poll_for_error(Duration::from_millis(100))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_tls_reconnect_twice_then_close_twice() {
        let gateway = loopback_gateway(Answer::Silence).await;
        let mut connection = gateway.connected().await;

        connection.reconnect().await.unwrap();
        connection.reconnect().await.unwrap();
        assert_eq!(gateway.accepted.load(Ordering::SeqCst), 3);
        assert!(connection.is_connected());

        connection.send(b"frame").await.unwrap();
        assert!(
            !connection
                .poll_for_error(Duration::from_millis(100))
                .await
                .unwrap()
        );

        connection.close().await;
        connection.close().await;
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.send(b"frame").await,
            Err(GatewayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_tls_connect_refused_is_connectivity() {
        let gateway = loopback_gateway(Answer::Silence).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = GatewayConnector {
            port,
            ..gateway.connector.clone()
        };
        let mut connection = connector
            .build("DeliveryWorker 0", &gateway.certificate)
            .unwrap();
        let error = connection.connect().await.unwrap_err();
        assert!(matches!(error, GatewayError::Connect { .. }));
        assert!(error.is_connectivity());
        assert!(!connection.is_connected());
    }

    #[test]
    fn test_build_rejects_certificate_without_key() {
        let connector = GatewayConnector::new("gateway.push.apple.com", 2195);
        let result = connector.build("DeliveryWorker 0", &Certificate::from("garbage"));
        assert!(matches!(result, Err(GatewayError::Certificate(_))));
    }

    #[test]
    fn test_connector_endpoint() {
        let connector = GatewayConnector::new("gateway.sandbox.push.apple.com", 2195);
        assert_eq!(connector.host(), "gateway.sandbox.push.apple.com");
        assert_eq!(connector.port(), 2195);
    }

    #[test]
    fn test_missing_extra_roots_file() {
        let connector = GatewayConnector::new("localhost", 2195);
        let result = connector.with_extra_roots(Path::new("/nonexistent/ca.pem"));
        assert!(matches!(result, Err(GatewayError::Certificate(_))));
    }

    #[test]
    fn test_only_certificate_errors_are_not_connectivity() {
        assert!(!GatewayError::Certificate("bad".into()).is_connectivity());
        assert!(GatewayError::NotConnected.is_connectivity());
        assert!(
            GatewayError::Write(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
                .is_connectivity()
        );
    }
}
