//! # Session
//!
//! Long-lived, ordered message exchange with a confirmed peer.
//!
//! A session owns the socket after the handshake: the blocking stream is
//! switched to non-blocking, registered with the tokio reactor and wrapped in
//! a [`Framed`] [`MessageCodec`]. Messages are delivered in send order.

use crate::config::ConnectConfig;
use crate::core::buffer::{Buffer, BufferMode};
use crate::core::types::ProcId;
use crate::error::{ProtocolError, Result};
use crate::protocol::framer::ConnectRequest;
use crate::protocol::handshake::{self, AcceptedPeer, Connected};
use crate::protocol::header::{MessageCodec, WireMessage};
use crate::protocol::identity::IdentityFlag;
use crate::security::SecurityModule;
use crate::transport::address::{AsyncPeerStream, Connector, PeerAddr, PeerStream, SocketConnector};
use crate::transport::rendezvous;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

type Transport = Framed<AsyncPeerStream, MessageCodec>;

/// What each end knows about the connection once it is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Index the server assigned to the connecting peer
    pub pindex: u32,
    pub flag: IdentityFlag,
    /// Identity of this end, declared or assigned
    pub local: Option<ProcId>,
    /// Identity of the other end, when it was exchanged
    pub remote: Option<ProcId>,
    /// Buffer mode the connecting peer declared
    pub buffer_mode: BufferMode,
}

impl PeerInfo {
    fn for_client(connected: &Connected) -> Self {
        let conf = &connected.confirmation;
        Self {
            pindex: conf.pindex,
            flag: connected.request.flag,
            local: conf.assigned.clone().or_else(|| connected.request.proc_id.clone()),
            remote: conf.server.clone(),
            buffer_mode: connected.request.buffer_mode,
        }
    }

    /// Server view of a confirmed peer
    pub fn for_server(peer: &AcceptedPeer, server: &ProcId) -> Self {
        Self {
            pindex: peer.pindex,
            flag: peer.request.flag,
            local: Some(server.clone()),
            remote: peer.identity.clone(),
            buffer_mode: peer.request.buffer_mode,
        }
    }
}

/// Decrements the active-session gauge once both halves are gone
#[derive(Debug)]
struct ActiveGuard;

impl ActiveGuard {
    fn new() -> Arc<Self> {
        global_metrics().session_opened();
        Arc::new(ActiveGuard)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        global_metrics().session_closed();
    }
}

/// Sending half of a session
pub struct SessionWriter {
    pindex: i32,
    sink: SplitSink<Transport, WireMessage>,
    _guard: Arc<ActiveGuard>,
}

impl SessionWriter {
    /// Send the packed contents of `buf` under `tag`
    pub async fn send(&mut self, tag: u32, buf: &Buffer) -> Result<()> {
        self.send_message(WireMessage::from_buffer(self.pindex, tag, buf)?)
            .await
    }

    pub async fn send_message(&mut self, msg: WireMessage) -> Result<()> {
        let len = msg.payload.len() as u64;
        self.sink.send(msg).await?;
        global_metrics().message_sent(len);
        Ok(())
    }

    /// Flush and shut down the write direction
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }
}

/// Receiving half of a session
pub struct SessionReader {
    stream: SplitStream<Transport>,
    _guard: Arc<ActiveGuard>,
}

impl SessionReader {
    /// Next message in arrival order
    pub async fn recv(&mut self) -> Result<WireMessage> {
        match self.stream.next().await {
            Some(Ok(msg)) => {
                global_metrics().message_received(msg.payload.len() as u64);
                Ok(msg)
            }
            Some(Err(e)) => Err(e),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<WireMessage> {
        with_timeout_error(self.recv(), timeout).await
    }
}

/// Confirmed connection registered with the reactor
pub struct Session {
    info: PeerInfo,
    writer: SessionWriter,
    reader: SessionReader,
}

impl Session {
    /// Hand a confirmed blocking stream to the reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn establish(stream: PeerStream, info: PeerInfo) -> Result<Self> {
        let transport = Framed::new(stream.into_async()?, MessageCodec::default());
        let (sink, stream) = transport.split();
        let guard = ActiveGuard::new();
        debug!(pindex = info.pindex, flag = %info.flag, "Session established");
        Ok(Self {
            writer: SessionWriter {
                pindex: info.pindex as i32,
                sink,
                _guard: Arc::clone(&guard),
            },
            reader: SessionReader {
                stream,
                _guard: guard,
            },
            info,
        })
    }

    /// Connect to `addr` over real sockets and complete the handshake
    pub async fn connect(
        addr: PeerAddr,
        request: ConnectRequest,
        security: Arc<dyn SecurityModule>,
        config: ConnectConfig,
    ) -> Result<Self> {
        Self::connect_with(Arc::new(SocketConnector::default()), addr, request, security, config).await
    }

    /// Like [`connect`](Self::connect) with a caller supplied connector
    #[instrument(skip(connector, request, security, config), fields(addr = %addr))]
    pub async fn connect_with(
        connector: Arc<dyn Connector>,
        addr: PeerAddr,
        request: ConnectRequest,
        security: Arc<dyn SecurityModule>,
        config: ConnectConfig,
    ) -> Result<Self> {
        // the handshake blocks on its socket, keep it off the reactor threads
        let connected = tokio::task::spawn_blocking(move || {
            handshake::connect(connector.as_ref(), &addr, request, security, &config)
        })
        .await
        .map_err(|e| ProtocolError::HandshakeError(format!("handshake task failed: {e}")))??;

        let info = PeerInfo::for_client(&connected);
        Self::establish(connected.stream, info)
    }

    /// Find the server through its rendezvous file, then connect
    pub async fn connect_via_rendezvous(
        path: PathBuf,
        request: ConnectRequest,
        security: Arc<dyn SecurityModule>,
        config: ConnectConfig,
    ) -> Result<Self> {
        let read_config = config.clone();
        let published = tokio::task::spawn_blocking(move || rendezvous::read(&path, &read_config))
            .await
            .map_err(|e| ProtocolError::HandshakeError(format!("rendezvous task failed: {e}")))??;
        debug!(server = %published.server, uri = %published.uri, "Found server");
        Self::connect(published.address()?, request, security, config).await
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Empty buffer in the mode negotiated for this connection
    pub fn buffer(&self) -> Buffer {
        Buffer::new(self.info.buffer_mode)
    }

    pub async fn send(&mut self, tag: u32, buf: &Buffer) -> Result<()> {
        self.writer.send(tag, buf).await
    }

    pub async fn send_message(&mut self, msg: WireMessage) -> Result<()> {
        self.writer.send_message(msg).await
    }

    pub async fn recv(&mut self) -> Result<WireMessage> {
        self.reader.recv().await
    }

    /// Receive, mapping an elapsed timer to [`ProtocolError::Timeout`]
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<WireMessage> {
        self.reader.recv_timeout(timeout).await
    }

    /// Receive one message and load it into a buffer for unpacking
    pub async fn recv_buffer(&mut self) -> Result<(u32, Buffer)> {
        let msg = self.recv().await?;
        let tag = msg.tag();
        Ok((tag, msg.into_buffer(self.info.buffer_mode)))
    }

    /// Split into independently owned halves
    pub fn split(self) -> (PeerInfo, SessionWriter, SessionReader) {
        (self.info, self.writer, self.reader)
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await
    }
}
