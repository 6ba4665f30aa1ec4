//! Peer addresses, blocking streams and the bounded connect loop.
//!
//! Connection setup runs on plain blocking sockets. Only once the handshake
//! has confirmed the peer is the stream converted with
//! [`PeerStream::into_async`] and handed to the tokio reactor.

use crate::config::ConnectConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, instrument, warn};

/// Where a server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    /// Local socket path
    Unix(PathBuf),
}

impl FromStr for PeerAddr {
    type Err = ProtocolError;

    fn from_str(uri: &str) -> Result<Self> {
        let bad = |what: &str| ProtocolError::BadParam(format!("{what}: {uri}"));
        if let Some(rest) = uri.strip_prefix("tcp4://") {
            let addr = SocketAddrV4::from_str(rest).map_err(|_| bad("invalid tcp4 address"))?;
            Ok(PeerAddr::Tcp(SocketAddr::V4(addr)))
        } else if let Some(rest) = uri.strip_prefix("tcp6://") {
            let addr = SocketAddrV6::from_str(rest).map_err(|_| bad("invalid tcp6 address"))?;
            Ok(PeerAddr::Tcp(SocketAddr::V6(addr)))
        } else if let Some(path) = uri.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(bad("empty socket path"));
            }
            Ok(PeerAddr::Unix(PathBuf::from(path)))
        } else {
            Err(ProtocolError::NotSupported(format!(
                "unrecognized address scheme: {uri}"
            )))
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(SocketAddr::V4(addr)) => write!(f, "tcp4://{addr}"),
            PeerAddr::Tcp(SocketAddr::V6(addr)) => write!(f, "tcp6://{addr}"),
            PeerAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Blocking connection used during the handshake
#[derive(Debug)]
pub enum PeerStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl PeerStream {
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            PeerStream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            PeerStream::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    /// Close both directions; errors on an already closed socket are ignored
    pub fn close(&self) {
        let _ = match self {
            PeerStream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }

    /// Register the socket with the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn into_async(self) -> Result<AsyncPeerStream> {
        match self {
            PeerStream::Tcp(s) => {
                s.set_read_timeout(None)?;
                s.set_nonblocking(true)?;
                Ok(AsyncPeerStream::Tcp(tokio::net::TcpStream::from_std(s)?))
            }
            #[cfg(unix)]
            PeerStream::Unix(s) => {
                s.set_read_timeout(None)?;
                s.set_nonblocking(true)?;
                Ok(AsyncPeerStream::Unix(tokio::net::UnixStream::from_std(s)?))
            }
        }
    }
}

impl Read for PeerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PeerStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for PeerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PeerStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PeerStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            PeerStream::Unix(s) => s.flush(),
        }
    }
}

/// Reactor-registered connection owned by a session
#[derive(Debug)]
pub enum AsyncPeerStream {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl AsyncRead for AsyncPeerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncPeerStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            AsyncPeerStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncPeerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AsyncPeerStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            AsyncPeerStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncPeerStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            AsyncPeerStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncPeerStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            AsyncPeerStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Opens one blocking connection per call
pub trait Connector: Send + Sync {
    fn connect(&self, addr: &PeerAddr) -> io::Result<PeerStream>;
}

/// Connector backed by real sockets
#[derive(Debug, Clone, Default)]
pub struct SocketConnector {
    /// TCP connect timeout; local sockets connect immediately or fail
    pub timeout: Option<Duration>,
}

impl Connector for SocketConnector {
    fn connect(&self, addr: &PeerAddr) -> io::Result<PeerStream> {
        match addr {
            PeerAddr::Tcp(sock) => {
                let stream = match self.timeout {
                    Some(t) => TcpStream::connect_timeout(sock, t)?,
                    None => TcpStream::connect(sock)?,
                };
                stream.set_nodelay(true)?;
                Ok(PeerStream::Tcp(stream))
            }
            #[cfg(unix)]
            PeerAddr::Unix(path) => Ok(PeerStream::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            PeerAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "local sockets are not available on this platform",
            )),
        }
    }
}

/// Connect failures worth another attempt
pub fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Connect to `addr`, making at most `max_retries` attempts.
///
/// Transient failures are retried after `retry_delay`; anything else fails
/// immediately. Both outcomes surface as [`ProtocolError::Unreachable`].
#[instrument(skip(connector, config), fields(addr = %addr))]
pub fn connect_with_retry<C>(connector: &C, addr: &PeerAddr, config: &ConnectConfig) -> Result<PeerStream>
where
    C: Connector + ?Sized,
{
    let metrics = global_metrics();
    let mut attempts = 0;
    while attempts < config.max_retries {
        attempts += 1;
        metrics.connect_attempt();
        match connector.connect(addr) {
            Ok(stream) => {
                debug!(attempts, "Connected");
                return Ok(stream);
            }
            Err(e) if is_transient(e.kind()) => {
                debug!(attempts, error = %e, "Transient connect failure");
                if attempts < config.max_retries {
                    metrics.connect_retry();
                    if !config.retry_delay.is_zero() {
                        thread::sleep(config.retry_delay);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                return Err(ProtocolError::Unreachable(format!("{addr}: {e}")));
            }
        }
    }
    warn!(attempts, "Giving up on connect");
    Err(ProtocolError::Unreachable(format!(
        "{addr}: {}",
        constants::ERR_CONNECT_EXHAUSTED
    )))
}
