//! # Connection Handshake
//!
//! Short synchronous sub-protocol that runs on a blocking socket before the
//! peer is handed to the async reactor.
//!
//! ## Client States
//! ```text
//! Init -> IdentitySent -> AwaitingAck -> Confirmed
//!                              |   ^
//!                              v   |
//!                         Authenticating
//! any state -> Failed
//! ```
//!
//! ## Server Reply
//! ```text
//! status u32                     READY_FOR_HANDSHAKE starts a challenge,
//!                                followed by a second status word
//! pindex u32                     on success only
//! server identity                [u8; 256] NUL padded + rank u32 (non-clients)
//! assigned identity              same form (peers that asked for one)
//! ```
//!
//! ## Retries
//! Connecting is retried by [`connect_with_retry`]. The handshake itself is
//! retried on a fresh connection only when the server reports that it is
//! temporarily unavailable; every other failure, including a rejected
//! credential, is returned immediately.

use crate::config::{ConnectConfig, ServerConfig};
use crate::core::types::{ProcId, Rank, MAX_NSLEN};
use crate::error::{constants, ProtocolError, Result, Status};
use crate::protocol::framer::ConnectRequest;
use crate::protocol::header::{read_message, recv_exact, recv_u32, send_all, send_u32};
use crate::protocol::identity::IdentityFlag;
use crate::security::{SecurityModule, SecurityRegistry};
use crate::transport::address::{connect_with_retry, Connector, PeerAddr, PeerStream};
use crate::utils::metrics::{global_metrics, Timer};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Width of a namespace on the confirmation wire
const FIXED_NSPACE_LEN: usize = MAX_NSLEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    IdentitySent,
    AwaitingAck,
    Authenticating,
    Confirmed,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the client learns once the server confirms it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub pindex: u32,
    pub server: Option<ProcId>,
    pub assigned: Option<ProcId>,
}

fn write_fixed_proc(out: &mut Vec<u8>, id: &ProcId) -> Result<()> {
    id.validate()?;
    let mut nspace = [0u8; FIXED_NSPACE_LEN];
    nspace[..id.nspace.len()].copy_from_slice(id.nspace.as_bytes());
    out.extend_from_slice(&nspace);
    out.extend_from_slice(&id.rank.to_be_bytes());
    Ok(())
}

/// Namespace handed to the `n`th peer that asked for an identity.
///
/// The server namespace is cut at a character boundary so the result
/// always fits [`MAX_NSLEN`].
fn tool_nspace(server: &str, n: u32) -> String {
    let suffix = format!("-tool-{n}");
    let mut end = server.len().min(MAX_NSLEN - suffix.len());
    while !server.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}", &server[..end])
}

fn read_fixed_proc<R: std::io::Read + ?Sized>(reader: &mut R) -> Result<ProcId> {
    let raw = recv_exact(reader, FIXED_NSPACE_LEN)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let nspace = std::str::from_utf8(&raw[..end])
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_STRING_NOT_UTF8.into()))?;
    let rank: Rank = recv_u32(reader)?;
    ProcId::new(nspace, rank)
}

fn read_status<R: std::io::Read + ?Sized>(reader: &mut R) -> Result<Status> {
    Ok(Status::from(recv_u32(reader)? as i32))
}

/// One connection attempt from the client side
pub struct ClientHandshake {
    state: HandshakeState,
    request: ConnectRequest,
    security: Arc<dyn SecurityModule>,
}

impl ClientHandshake {
    pub fn new(request: ConnectRequest, security: Arc<dyn SecurityModule>) -> Self {
        Self {
            state: HandshakeState::Init,
            request,
            security,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = %self.state, to = %next, "Handshake transition");
        self.state = next;
    }

    /// Drive the state machine over an already connected stream.
    ///
    /// On failure the stream is shut down and the state is `Failed`.
    #[instrument(skip(self, stream), fields(flag = %self.request.flag))]
    pub fn run(&mut self, stream: &mut PeerStream, timeout: Duration) -> Result<Confirmation> {
        let _timer = Timer::start("client_handshake");
        global_metrics().handshake_attempt();
        match self.exchange(stream, timeout) {
            Ok(confirmation) => {
                self.transition(HandshakeState::Confirmed);
                global_metrics().handshake_success();
                Ok(confirmation)
            }
            Err(e) => {
                self.transition(HandshakeState::Failed);
                global_metrics().handshake_failed();
                stream.close();
                Err(e)
            }
        }
    }

    fn exchange(&mut self, stream: &mut PeerStream, timeout: Duration) -> Result<Confirmation> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let msg = self.request.frame()?;
        send_all(stream, &msg.to_bytes())?;
        self.transition(HandshakeState::IdentitySent);
        self.transition(HandshakeState::AwaitingAck);

        let mut status = read_status(stream)?;
        if status == Status::READY_FOR_HANDSHAKE {
            self.transition(HandshakeState::Authenticating);
            self.security.client_challenge(stream)?;
            status = read_status(stream)?;
        }
        if let Err(e) = status.into_result() {
            if status == Status::INVALID_CREDENTIAL {
                global_metrics().credential_rejected();
            }
            warn!(%status, "Server refused connection");
            return Err(e);
        }

        let pindex = recv_u32(stream)?;
        let flag = self.request.flag;
        let server = if flag.receives_server_identity() {
            Some(read_fixed_proc(stream)?)
        } else {
            None
        };
        let assigned = if flag.needs_id() {
            Some(read_fixed_proc(stream)?)
        } else {
            None
        };
        Ok(Confirmation {
            pindex,
            server,
            assigned,
        })
    }

    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }
}

/// A confirmed client connection, still on its blocking socket
#[derive(Debug)]
pub struct Connected {
    pub stream: PeerStream,
    pub confirmation: Confirmation,
    pub request: ConnectRequest,
}

/// Connect and run the handshake, with both retry layers applied
#[instrument(skip(connector, request, security, config), fields(addr = %addr, flag = %request.flag))]
pub fn connect<C>(
    connector: &C,
    addr: &PeerAddr,
    request: ConnectRequest,
    security: Arc<dyn SecurityModule>,
    config: &ConnectConfig,
) -> Result<Connected>
where
    C: Connector + ?Sized,
{
    let credential = security.create_credential()?;
    let request = request.with_security(security.name(), credential);

    let mut attempts = 0;
    loop {
        attempts += 1;
        let mut stream = connect_with_retry(connector, addr, config)?;
        let mut handshake = ClientHandshake::new(request.clone(), Arc::clone(&security));
        match handshake.run(&mut stream, config.handshake_timeout) {
            Ok(confirmation) => {
                info!(pindex = confirmation.pindex, attempts, "Connection confirmed");
                return Ok(Connected {
                    stream,
                    confirmation,
                    request,
                });
            }
            Err(e) if e.is_retryable() && attempts < config.handshake_max_retries => {
                warn!(attempts, error = %e, "Server temporarily unavailable, retrying handshake");
            }
            Err(e) if e.is_retryable() => {
                warn!(attempts, "{}", constants::ERR_HANDSHAKE_EXHAUSTED);
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shared state of a listening server
#[derive(Debug)]
pub struct ServerContext {
    identity: ProcId,
    security: SecurityRegistry,
    config: ServerConfig,
    next_index: AtomicU32,
    next_tool: AtomicU32,
    accepting: AtomicBool,
    clients: RwLock<HashSet<ProcId>>,
}

impl ServerContext {
    /// Fails when `identity` could not be sent in a confirmation block
    pub fn new(identity: ProcId, security: SecurityRegistry, config: ServerConfig) -> Result<Self> {
        identity.validate()?;
        Ok(Self {
            identity,
            security,
            config,
            next_index: AtomicU32::new(0),
            next_tool: AtomicU32::new(0),
            accepting: AtomicBool::new(true),
            clients: RwLock::new(HashSet::new()),
        })
    }

    pub fn identity(&self) -> &ProcId {
        &self.identity
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Allow a client process to connect
    pub fn register_client(&self, id: ProcId) -> Result<()> {
        self.clients
            .write()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_LOCK_POISONED.into()))?
            .insert(id);
        Ok(())
    }

    pub fn is_registered(&self, id: &ProcId) -> Result<bool> {
        Ok(self
            .clients
            .read()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_LOCK_POISONED.into()))?
            .contains(id))
    }

    /// While paused, new peers are told to come back later
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    fn assign_identity(&self) -> Result<ProcId> {
        let n = self.next_tool.fetch_add(1, Ordering::SeqCst);
        ProcId::new(tool_nspace(&self.identity.nspace, n), 0)
    }
}

/// A peer the server has confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedPeer {
    pub pindex: u32,
    /// Declared or assigned identity; legacy tools may have none
    pub identity: Option<ProcId>,
    pub request: ConnectRequest,
}

/// Tell the peer why it was refused, then surface the error
fn refuse(stream: &mut PeerStream, error: ProtocolError) -> ProtocolError {
    let status = error.status();
    if let Err(e) = send_u32(stream, status.code() as u32) {
        debug!(error = %e, "Could not deliver refusal status");
    }
    if status == Status::INVALID_CREDENTIAL {
        global_metrics().credential_rejected();
    }
    error
}

/// Server side of the handshake for one accepted connection
#[instrument(skip(stream, ctx))]
pub fn accept_handshake(stream: &mut PeerStream, ctx: &ServerContext) -> Result<AcceptedPeer> {
    global_metrics().handshake_attempt();
    let result = serve(stream, ctx);
    match &result {
        Ok(peer) => {
            global_metrics().handshake_success();
            info!(pindex = peer.pindex, flag = %peer.request.flag, "Peer confirmed");
        }
        Err(e) => {
            global_metrics().handshake_failed();
            warn!(error = %e, "Handshake failed");
            stream.close();
        }
    }
    result
}

fn serve(stream: &mut PeerStream, ctx: &ServerContext) -> Result<AcceptedPeer> {
    stream.set_read_timeout(Some(ctx.config.handshake_timeout))?;
    stream.set_write_timeout(Some(ctx.config.handshake_timeout))?;

    let msg = read_message(stream, ctx.config.max_handshake_size)?;
    let request = ConnectRequest::unframe(&msg)?;
    debug!(flag = %request.flag, version = %request.version, security = %request.security, "Identity received");

    if !ctx.accepting.load(Ordering::SeqCst) {
        return Err(refuse(stream, ProtocolError::TempUnavailable));
    }

    if request.flag.is_registered_client() {
        let known = match &request.proc_id {
            Some(id) => ctx.is_registered(id)?,
            None => false,
        };
        if !known {
            return Err(refuse(
                stream,
                ProtocolError::NotFound(constants::ERR_UNKNOWN_CLIENT.into()),
            ));
        }
    }

    let module = ctx
        .security
        .get(&request.security)
        .map_err(|e| refuse(stream, e))?;
    module
        .validate_credential(&request, request.credential.as_deref())
        .map_err(|e| refuse(stream, e))?;
    if module.requires_challenge() {
        send_u32(stream, Status::READY_FOR_HANDSHAKE.code() as u32)?;
        module.server_challenge(stream).map_err(|e| refuse(stream, e))?;
    }

    let assigned = if request.flag.needs_id() {
        Some(ctx.assign_identity().map_err(|e| refuse(stream, e))?)
    } else {
        None
    };
    let pindex = ctx.next_index.fetch_add(1, Ordering::SeqCst);

    let mut confirmation = Vec::with_capacity(4 + 2 * (FIXED_NSPACE_LEN + 4));
    confirmation.extend_from_slice(&pindex.to_be_bytes());
    if request.flag.receives_server_identity() {
        write_fixed_proc(&mut confirmation, &ctx.identity).map_err(|e| refuse(stream, e))?;
    }
    if let Some(id) = &assigned {
        write_fixed_proc(&mut confirmation, id).map_err(|e| refuse(stream, e))?;
    }

    let mut reply = Vec::with_capacity(4 + confirmation.len());
    reply.extend_from_slice(&(Status::SUCCESS.code() as u32).to_be_bytes());
    reply.extend_from_slice(&confirmation);
    send_all(stream, &reply)?;

    let identity = assigned.or_else(|| request.proc_id.clone());
    Ok(AcceptedPeer {
        pindex,
        identity,
        request,
    })
}

/// Byte length of the confirmation block sent to a peer with `flag`
pub fn confirmation_len(flag: IdentityFlag) -> usize {
    let mut len = 4;
    if flag.receives_server_identity() {
        len += FIXED_NSPACE_LEN + 4;
    }
    if flag.needs_id() {
        len += FIXED_NSPACE_LEN + 4;
    }
    len
}
