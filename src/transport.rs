//! Stream sockets to the Bot API.
//!
//! A [`Connector`] opens a byte stream (TLS in production, anything in tests);
//! [`Connection`] owns at most one such stream and reopens it on demand.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, TelegramError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxStream = Box<dyn Stream>;

/// Opens a byte stream to `addr:port`. `server_name` is the host the stream
/// must authenticate as, which differs from `addr` when dialing by IP.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str, port: u16, server_name: &str) -> Result<BoxStream>;
}

/// Plain TCP, for local proxies and test servers
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str, port: u16, _server_name: &str) -> Result<BoxStream> {
        let tcp = dial(addr, port).await?;
        Ok(Box::new(tcp))
    }
}

/// TLS over TCP with either the webpki root set or a pinned root certificate
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Trust the bundled webpki roots
    pub fn new() -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::from_roots(root_store)
    }

    /// Trust only the certificates in a PEM bundle
    pub fn with_pinned_pem(pem: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(pem);
        let mut root_store = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut cursor) {
            let cert = cert.map_err(|e| TelegramError::Tls(format!("Bad PEM data: {}", e)))?;
            root_store
                .add(cert)
                .map_err(|e| TelegramError::Tls(format!("Failed to add CA cert: {}", e)))?;
        }
        if root_store.is_empty() {
            return Err(TelegramError::Tls(
                "PEM bundle contains no certificates".to_string(),
            ));
        }
        Ok(Self::from_roots(root_store))
    }

    pub fn with_pinned_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path)?;
        Self::with_pinned_pem(&pem)
    }

    fn from_roots(root_store: rustls::RootCertStore) -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, addr: &str, port: u16, server_name: &str) -> Result<BoxStream> {
        let tcp = dial(addr, port).await?;
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| TelegramError::Tls(format!("Invalid server name: {}", e)))?;
        let tls = self
            .inner
            .connect(name, tcp)
            .await
            .map_err(|e| TelegramError::Tls(format!("TLS handshake failed: {}", e)))?;
        Ok(Box::new(tls))
    }
}

async fn dial(addr: &str, port: u16) -> Result<TcpStream> {
    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((addr, port)))
        .await
        .map_err(|_| TelegramError::NotConnected(format!("{}:{} (timeout)", addr, port)))??;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

/// The single stream shared by every command, reopened lazily
pub struct Connection {
    connector: Arc<dyn Connector>,
    host: String,
    fallback_ip: Option<String>,
    port: u16,
    stream: Option<BufReader<BoxStream>>,
    last_connected: Option<Instant>,
}

impl Connection {
    pub fn new(
        connector: Arc<dyn Connector>,
        host: impl Into<String>,
        fallback_ip: Option<String>,
        port: u16,
    ) -> Self {
        Self {
            connector,
            host: host.into(),
            fallback_ip,
            port,
            stream: None,
            last_connected: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Return the open stream, connecting first if needed. The hostname is
    /// tried before the fallback IP.
    pub async fn ensure_connected(&mut self) -> Result<&mut BufReader<BoxStream>> {
        if self.stream.is_none() {
            let stream = self.open().await?;
            self.stream = Some(BufReader::new(stream));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| TelegramError::NotConnected(self.host.clone()))
    }

    /// The open stream, if any, without connecting
    pub fn stream(&mut self) -> Option<&mut BufReader<BoxStream>> {
        self.stream.as_mut()
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed connection to {}", self.host);
        }
    }

    /// Whether reply bytes can be read right now without waiting. A stream
    /// found at EOF or in error is dropped.
    pub fn has_data(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let readable = match stream.fill_buf().now_or_never() {
            None => return false,
            Some(Ok(buf)) => Ok(!buf.is_empty()),
            Some(Err(e)) => Err(e),
        };
        match readable {
            Ok(true) => true,
            Ok(false) => {
                debug!("Server closed connection to {}", self.host);
                self.stream = None;
                false
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.host, e);
                self.stream = None;
                false
            }
        }
    }

    async fn open(&mut self) -> Result<BoxStream> {
        debug!("Start handshaking with {}:{}", self.host, self.port);
        match self.connector.connect(&self.host, self.port, &self.host).await {
            Ok(stream) => {
                match self.last_connected {
                    Some(at) => info!(
                        "Connected to {} (last connection was {}s ago)",
                        self.host,
                        at.elapsed().as_secs()
                    ),
                    None => info!("Connected to {}", self.host),
                }
                self.last_connected = Some(Instant::now());
                return Ok(stream);
            }
            Err(e) => warn!("Unable to connect to {}: {}", self.host, e),
        }

        let Some(ip) = self.fallback_ip.clone() else {
            return Err(TelegramError::NotConnected(self.host.clone()));
        };
        match self.connector.connect(&ip, self.port, &self.host).await {
            Ok(stream) => {
                info!("Connected to {} using IP address {}", self.host, ip);
                self.last_connected = Some(Instant::now());
                Ok(stream)
            }
            Err(e) => {
                warn!("Unable to connect to {}: {}", ip, e);
                Err(TelegramError::NotConnected(format!("{} / {}", self.host, ip)))
            }
        }
    }
}
