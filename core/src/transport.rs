//! Plain and TLS transports and the connection that owns them.
//!
//! # Design
//! `Transport` is a closed enum with one variant per wire: a bare
//! `TcpStream`, or a rustls `StreamOwned` over one. The variant family is
//! fixed by the `Scheme` a `Connection` is constructed with. `TlsContext`
//! wraps the process-wide `rustls::ClientConfig` and is shared by `Arc`
//! rather than hidden in a global.
//!
//! Connect and handshake are each bounded by a deadline from `ClientConfig`.
//! Once established, socket timeouts are reset to `read_timeout` (none by
//! default). `close` is best-effort, idempotent and also runs on drop.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, RootCertStore, StreamOwned};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Upper bound on flushing `close_notify` during close.
const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared, read-only TLS client configuration.
///
/// Only TLS 1.3 and TLS 1.2 are offered. Server certificates are checked
/// against the trust store the context was built with; there is no pinning
/// and no client authentication.
#[derive(Debug, Clone)]
pub struct TlsContext {
    config: Arc<rustls::ClientConfig>,
}

impl TlsContext {
    /// Trust the platform's native roots, falling back to the bundled
    /// Mozilla roots when the platform store is empty or partly unreadable.
    pub fn new() -> Result<Self, ClientError> {
        let mut roots = RootCertStore::empty();
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            warn!("failed to load platform certificates: {err}");
        }
        for cert in loaded.certs {
            if let Err(e) = roots.add(cert) {
                warn!("skipping unusable platform certificate: {e}");
            }
        }
        if roots.is_empty() || !loaded.errors.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        debug!(roots = roots.len(), "built TLS trust store");
        Self::with_roots(roots)
    }

    /// Trust only the bundled Mozilla roots.
    pub fn with_webpki_roots() -> Result<Self, ClientError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: RootCertStore) -> Result<Self, ClientError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::from_config(Arc::new(config)))
    }

    /// Use a caller-built configuration as-is.
    pub fn from_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Arc<rustls::ClientConfig> {
        Arc::clone(&self.config)
    }
}

/// Which transport a `Connection` speaks.
#[derive(Debug, Clone)]
pub enum Scheme {
    Http,
    Https(Arc<TlsContext>),
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https(_) => 443,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https(_))
    }
}

/// An established byte stream.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Transport {
    /// Shut the transport down. Plain sockets are shut in both directions;
    /// TLS sends `close_notify` first. Errors are logged and dropped.
    fn shutdown(self) {
        match self {
            Transport::Plain(sock) => {
                if let Err(e) = sock.shutdown(Shutdown::Both) {
                    debug!("socket shutdown failed: {e}");
                }
            }
            Transport::Tls(mut stream) => {
                // A peer that stopped reading must not stall close.
                if let Err(e) = stream.sock.set_write_timeout(Some(CLOSE_NOTIFY_TIMEOUT)) {
                    debug!("failed to bound close_notify write: {e}");
                }
                stream.conn.send_close_notify();
                while stream.conn.wants_write() {
                    match stream.conn.write_tls(&mut stream.sock) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("failed to send close_notify: {e}");
                            break;
                        }
                    }
                }
                if let Err(e) = stream.sock.shutdown(Shutdown::Both) {
                    debug!("socket shutdown failed: {e}");
                }
            }
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(sock) => sock.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

/// One logical connection: resolve, connect, optionally handshake, close.
#[derive(Debug)]
pub struct Connection {
    scheme: Scheme,
    config: ClientConfig,
    transport: Option<Transport>,
    host: String,
    port: u16,
}

impl Connection {
    pub fn new(scheme: Scheme, config: ClientConfig) -> Self {
        Self {
            scheme,
            config,
            transport: None,
            host: String::new(),
            port: 0,
        }
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `Host` request header. The port is omitted when it is
    /// the scheme's default; IPv6 literals are bracketed.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Resolve `host:port`, connect, and for TLS complete the handshake.
    ///
    /// Any previous transport is closed first. On failure the connection is
    /// left unconnected.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        self.close();

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| ClientError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::Resolve {
                host: host.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            });
        }
        debug!(host, port, addrs = addrs.len(), "resolved");

        let sock = connect_any(&addrs, self.config.connect_timeout).map_err(|source| {
            ClientError::Connect {
                host: host.to_string(),
                port,
                source,
            }
        })?;
        let connect_err = |source| ClientError::Connect {
            host: host.to_string(),
            port,
            source,
        };
        sock.set_nodelay(true).map_err(connect_err)?;

        let transport = match &self.scheme {
            Scheme::Http => Transport::Plain(sock),
            Scheme::Https(tls) => {
                let stream = handshake(sock, host, tls, self.config.handshake_timeout)?;
                debug!(
                    host,
                    version = ?stream.conn.protocol_version(),
                    "TLS handshake complete"
                );
                Transport::Tls(Box::new(stream))
            }
        };

        let sock = match &transport {
            Transport::Plain(sock) => sock,
            Transport::Tls(stream) => &stream.sock,
        };
        sock.set_read_timeout(self.config.read_timeout)
            .map_err(connect_err)?;
        sock.set_write_timeout(self.config.read_timeout)
            .map_err(connect_err)?;

        self.host = host.to_string();
        self.port = port;
        self.transport = Some(transport);
        Ok(())
    }

    pub fn transport_mut(&mut self) -> Result<&mut Transport, ClientError> {
        self.transport.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Shut the transport down. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!(host = %self.host, port = self.port, "closing connection");
            transport.shutdown();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Try each address in turn until one connects. All attempts share one
/// deadline of `timeout`.
fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(sock) => {
                debug!(%addr, "connected");
                return Ok(sock);
            }
            Err(e) => {
                debug!(%addr, "connect failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))
}

/// Drive the TLS handshake to completion within `timeout`.
fn handshake(
    mut sock: TcpStream,
    host: &str,
    tls: &TlsContext,
    timeout: Duration,
) -> Result<TlsStream, ClientError> {
    let handshake_err = |source| ClientError::Handshake {
        host: host.to_string(),
        source,
    };
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::InvalidServerName(host.to_string()))?;
    let mut conn = ClientConnection::new(tls.config(), server_name)
        .map_err(|e| handshake_err(io::Error::other(e)))?;

    let deadline = Instant::now() + timeout;
    while conn.is_handshaking() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(handshake_err(timed_out()));
        }
        sock.set_read_timeout(Some(remaining))
            .and_then(|_| sock.set_write_timeout(Some(remaining)))
            .map_err(handshake_err)?;
        if let Err(e) = conn.complete_io(&mut sock) {
            let e = match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => timed_out(),
                _ => e,
            };
            return Err(handshake_err(e));
        }
    }
    Ok(StreamOwned::new(conn, sock))
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out")
}
