//! Connection handshake over real local sockets
//!
//! Each test runs the server side on its own thread against a Unix socket in
//! a temporary directory and drives the client side from the test thread.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use launchwire::config::{ConnectConfig, ServerConfig};
use launchwire::core::ProcId;
use launchwire::protocol::handshake::{accept_handshake, connect, AcceptedPeer, ServerContext};
use launchwire::protocol::{ConnectRequest, IdentityFlag};
use launchwire::security::{NoSecurity, SecurityModule, SecurityRegistry, SharedKeySecurity};
use launchwire::transport::address::{Connector, PeerAddr, PeerStream, SocketConnector};
use launchwire::{ProtocolError, Status};
use std::io;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    ctx: Arc<ServerContext>,
}

fn fixture(security: SecurityRegistry) -> Fixture {
    fixture_for(ProcId::new("srv", 0).unwrap(), security)
}

fn fixture_for(identity: ProcId, security: SecurityRegistry) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("server.sock");
    let config = ServerConfig {
        socket_path: path.clone(),
        handshake_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    };
    let ctx = Arc::new(ServerContext::new(identity, security, config).unwrap());
    Fixture {
        _dir: dir,
        path,
        ctx,
    }
}

fn client_config() -> ConnectConfig {
    ConnectConfig {
        max_retries: 3,
        handshake_max_retries: 3,
        handshake_timeout: Duration::from_secs(2),
        ..ConnectConfig::default()
    }
}

/// Serve exactly `connections` handshakes, then hand the listener back
fn serve(
    fixture: &Fixture,
    connections: usize,
) -> JoinHandle<(UnixListener, Vec<Result<AcceptedPeer, ProtocolError>>)> {
    let listener = UnixListener::bind(&fixture.path).unwrap();
    let ctx = Arc::clone(&fixture.ctx);
    thread::spawn(move || {
        let mut results = Vec::new();
        for _ in 0..connections {
            let (stream, _) = listener.accept().unwrap();
            let mut stream = PeerStream::Unix(stream);
            results.push(accept_handshake(&mut stream, &ctx));
        }
        (listener, results)
    })
}

/// No further connection is waiting on the listener
fn assert_no_pending(listener: &UnixListener) {
    listener.set_nonblocking(true).unwrap();
    match listener.accept() {
        Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
        Ok(_) => panic!("client made more attempts than expected"),
    }
}

struct Counting<C> {
    inner: C,
    calls: AtomicU32,
}

impl<C> Counting<C> {
    fn new(inner: C) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Connector for Counting<C> {
    fn connect(&self, addr: &PeerAddr) -> io::Result<PeerStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(addr)
    }
}

struct AlwaysRefused;

impl Connector for AlwaysRefused {
    fn connect(&self, _addr: &PeerAddr) -> io::Result<PeerStream> {
        Err(io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

fn none() -> Arc<dyn SecurityModule> {
    Arc::new(NoSecurity)
}

#[test]
fn test_registered_client_is_confirmed() {
    let fx = fixture(SecurityRegistry::new());
    let me = ProcId::new("job", 3).unwrap();
    fx.ctx.register_client(me.clone()).unwrap();
    let server = serve(&fx, 1);

    let request = ConnectRequest::new(IdentityFlag::SimpleClient).with_proc(me.clone());
    let connected = connect(
        &SocketConnector::default(),
        &PeerAddr::Unix(fx.path.clone()),
        request,
        none(),
        &client_config(),
    )
    .unwrap();

    assert_eq!(connected.confirmation.pindex, 0);
    assert_eq!(connected.confirmation.server, None);
    assert_eq!(connected.confirmation.assigned, None);

    let (_, results) = server.join().unwrap();
    let peer = results.into_iter().next().unwrap().unwrap();
    assert_eq!(peer.identity, Some(me));
    assert_eq!(peer.request.security, "none");
}

#[test]
fn test_tool_receives_server_and_assigned_identity() {
    let fx = fixture(SecurityRegistry::new());
    let server = serve(&fx, 2);
    let addr = PeerAddr::Unix(fx.path.clone());

    let first = connect(
        &SocketConnector::default(),
        &addr,
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1000, 1000),
        none(),
        &client_config(),
    )
    .unwrap();
    let second = connect(
        &SocketConnector::default(),
        &addr,
        ConnectRequest::new(IdentityFlag::ToolGivenId)
            .with_ids(1000, 1000)
            .with_proc(ProcId::new("mytool", 0).unwrap()),
        none(),
        &client_config(),
    )
    .unwrap();

    let server_id = ProcId::new("srv", 0).unwrap();
    assert_eq!(first.confirmation.server.as_ref(), Some(&server_id));
    assert_eq!(
        first.confirmation.assigned,
        Some(ProcId::new("srv-tool-0", 0).unwrap())
    );
    assert_eq!(second.confirmation.server.as_ref(), Some(&server_id));
    assert_eq!(second.confirmation.assigned, None);
    assert_eq!(second.confirmation.pindex, first.confirmation.pindex + 1);

    let (_, results) = server.join().unwrap();
    assert!(results.iter().all(Result::is_ok));
}

#[test]
fn test_long_server_namespace_still_assigns_identity() {
    let long = "y".repeat(250);
    let fx = fixture_for(ProcId::new(long.clone(), 0).unwrap(), SecurityRegistry::new());
    let server = serve(&fx, 1);

    let outcome = connect(
        &SocketConnector::default(),
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        none(),
        &client_config(),
    )
    .unwrap();

    let assigned = outcome.confirmation.assigned.unwrap();
    assert!(assigned.nspace.len() <= launchwire::core::types::MAX_NSLEN);
    assert!(assigned.nspace.starts_with("yyyy"));
    assert!(assigned.nspace.ends_with("-tool-0"));
    assert_eq!(outcome.confirmation.server.unwrap().nspace, long);

    let (_, results) = server.join().unwrap();
    assert_eq!(results[0].as_ref().unwrap().identity.as_ref(), Some(&assigned));
}

#[test]
fn test_oversized_server_identity_is_rejected_up_front() {
    let result = ServerContext::new(
        ProcId {
            nspace: "x".repeat(300),
            rank: 0,
        },
        SecurityRegistry::new(),
        ServerConfig::default(),
    );
    assert!(matches!(result, Err(ProtocolError::BadParam(_))));
}

#[test]
fn test_shared_key_challenge_succeeds() {
    let mut registry = SecurityRegistry::new();
    registry.register(Arc::new(SharedKeySecurity::new(b"cluster-secret".to_vec())));
    let fx = fixture(registry);
    let server = serve(&fx, 1);

    let connected = connect(
        &SocketConnector::default(),
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        Arc::new(SharedKeySecurity::new(b"cluster-secret".to_vec())),
        &client_config(),
    )
    .unwrap();
    assert!(connected.confirmation.assigned.is_some());

    let (_, results) = server.join().unwrap();
    assert_eq!(results[0].as_ref().unwrap().request.security, "shared-key");
}

#[test]
fn test_invalid_credential_is_not_retried() {
    let mut registry = SecurityRegistry::new();
    registry.register(Arc::new(SharedKeySecurity::new(b"alpha".to_vec())));
    let fx = fixture(registry);
    let server = serve(&fx, 1);
    let connector = Counting::new(SocketConnector::default());

    let result = connect(
        &connector,
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        Arc::new(SharedKeySecurity::new(b"beta".to_vec())),
        &client_config(),
    );
    assert!(matches!(result, Err(ProtocolError::InvalidCredential)));
    assert_eq!(connector.calls(), 1);

    let (listener, results) = server.join().unwrap();
    assert!(matches!(results[0], Err(ProtocolError::InvalidCredential)));
    assert_no_pending(&listener);
}

#[test]
fn test_temporarily_unavailable_is_retried_up_to_limit() {
    let fx = fixture(SecurityRegistry::new());
    fx.ctx.set_accepting(false);
    let config = client_config();
    let server = serve(&fx, config.handshake_max_retries as usize);
    let connector = Counting::new(SocketConnector::default());

    let result = connect(
        &connector,
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        none(),
        &config,
    );
    assert!(matches!(result, Err(ProtocolError::TempUnavailable)));
    assert_eq!(connector.calls(), config.handshake_max_retries);

    let (listener, results) = server.join().unwrap();
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ProtocolError::TempUnavailable))));
    assert_no_pending(&listener);
}

#[test]
fn test_unregistered_client_is_refused() {
    let fx = fixture(SecurityRegistry::new());
    let server = serve(&fx, 1);

    let result = connect(
        &SocketConnector::default(),
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::SimpleClient).with_proc(ProcId::new("job", 9).unwrap()),
        none(),
        &client_config(),
    );
    assert!(matches!(
        result,
        Err(ProtocolError::PeerStatus(Status::NOT_FOUND))
    ));

    let (_, results) = server.join().unwrap();
    assert!(matches!(results[0], Err(ProtocolError::NotFound(_))));
}

#[test]
fn test_unknown_security_module_is_refused() {
    let fx = fixture(SecurityRegistry::new());
    let server = serve(&fx, 1);

    let result = connect(
        &SocketConnector::default(),
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        Arc::new(SharedKeySecurity::new(b"alpha".to_vec())),
        &client_config(),
    );
    assert!(matches!(result, Err(ProtocolError::NotSupported(_))));
    server.join().unwrap();
}

#[test]
fn test_transient_connect_failures_exhaust_after_max_retries() {
    let connector = Counting::new(AlwaysRefused);
    let config = ConnectConfig {
        max_retries: 4,
        ..client_config()
    };

    let result = connect(
        &connector,
        &PeerAddr::Unix(PathBuf::from("/nonexistent/launchwire.sock")),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        none(),
        &config,
    );
    assert!(matches!(result, Err(ProtocolError::Unreachable(_))));
    assert_eq!(connector.calls(), 4);
}

#[test]
fn test_missing_socket_fails_fast() {
    let dir = TempDir::new().unwrap();
    let connector = Counting::new(SocketConnector::default());

    let result = connect(
        &connector,
        &PeerAddr::Unix(dir.path().join("absent.sock")),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        none(),
        &client_config(),
    );
    assert!(matches!(result, Err(ProtocolError::Unreachable(_))));
    assert_eq!(connector.calls(), 1);
}

#[test]
fn test_silent_server_times_out_without_retry() {
    let fx = fixture(SecurityRegistry::new());
    let listener = UnixListener::bind(&fx.path).unwrap();
    // accept and hold the connection without ever replying
    let holder = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
        listener
    });

    let connector = Counting::new(SocketConnector::default());
    let config = ConnectConfig {
        handshake_timeout: Duration::from_millis(100),
        ..client_config()
    };
    let result = connect(
        &connector,
        &PeerAddr::Unix(fx.path.clone()),
        ConnectRequest::new(IdentityFlag::ToolNeedsId).with_ids(1, 1),
        none(),
        &config,
    );
    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert_eq!(connector.calls(), 1);

    let listener = holder.join().unwrap();
    assert_no_pending(&listener);
}
