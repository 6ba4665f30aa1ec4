//! Local socket listener.
//!
//! Accepts connections on a Unix domain socket, runs the server side of the
//! handshake for each one on a blocking worker and yields confirmed sessions
//! over an mpsc channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::config::PROTOCOL_VERSION;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{accept_handshake, ServerContext};
use crate::protocol::session::{PeerInfo, Session};
use crate::transport::address::PeerStream;
use crate::transport::rendezvous::Rendezvous;
use crate::utils::metrics::global_metrics;

/// Bound listener, ready to accept
pub struct LocalServer {
    listener: UnixListener,
    path: PathBuf,
    ctx: Arc<ServerContext>,
}

impl LocalServer {
    /// Bind the socket named by the context's configuration, replacing any
    /// stale socket file. Must be called from within a tokio runtime.
    #[instrument(skip(ctx), fields(socket_path = %ctx.config().socket_path.display()))]
    pub fn bind(ctx: Arc<ServerContext>) -> Result<Self> {
        let path = ctx.config().socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path).ok();
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Listening on unix socket");
        Ok(Self { listener, path, ctx })
    }

    pub fn uri(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Publish a rendezvous file for this listener in `dir`
    pub fn publish_rendezvous<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let file = dir.as_ref().join(Rendezvous::file_name(std::process::id()));
        Rendezvous::new(self.ctx.identity().clone(), self.uri())
            .with_process_details(PROTOCOL_VERSION)
            .write(&file)?;
        Ok(file)
    }

    /// Accept until `shutdown_rx` fires, delivering confirmed sessions on `sessions`
    #[instrument(skip_all, fields(socket_path = %self.path.display()))]
    pub async fn run(
        self,
        sessions: mpsc::Sender<Session>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        // Track handshakes in flight
        let pending = Arc::new(Mutex::new(0u32));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down listener. Waiting for handshakes to finish...");

                    let timeout = tokio::time::sleep(self.ctx.config().shutdown_timeout);
                    tokio::pin!(timeout);

                    loop {
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!("Shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                                let in_flight = *pending.lock().await;
                                if in_flight == 0 {
                                    break;
                                }
                                debug!(in_flight, "Waiting for handshakes");
                            }
                        }
                    }

                    if self.path.exists() {
                        if let Err(e) = tokio::fs::remove_file(&self.path).await {
                            error!(error = %e, path = %self.path.display(), "Failed to remove socket file");
                        } else {
                            info!(path = %self.path.display(), "Removed socket file");
                        }
                    }
                    global_metrics().log_metrics();
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            *pending.lock().await += 1;
                            let pending = Arc::clone(&pending);
                            let ctx = Arc::clone(&self.ctx);
                            let sessions = sessions.clone();

                            tokio::spawn(async move {
                                if let Err(e) = admit(stream, ctx, sessions).await {
                                    debug!(error = %e, "Connection not admitted");
                                }
                                *pending.lock().await -= 1;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

/// Run the blocking handshake for one connection and register the session
async fn admit(
    stream: tokio::net::UnixStream,
    ctx: Arc<ServerContext>,
    sessions: mpsc::Sender<Session>,
) -> Result<()> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    let mut peer_stream = PeerStream::Unix(stream);

    let server = ctx.identity().clone();
    let (peer_stream, accepted) = tokio::task::spawn_blocking(move || {
        let accepted = accept_handshake(&mut peer_stream, &ctx);
        (peer_stream, accepted)
    })
    .await
    .map_err(|e| ProtocolError::HandshakeError(format!("handshake task failed: {e}")))?;
    let accepted = accepted?;

    let session = Session::establish(peer_stream, PeerInfo::for_server(&accepted, &server))?;
    sessions
        .send(session)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}

/// Bind and serve until `shutdown_rx` fires
pub async fn start_server_with_shutdown(
    ctx: Arc<ServerContext>,
    sessions: mpsc::Sender<Session>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    LocalServer::bind(ctx)?.run(sessions, shutdown_rx).await
}

/// Bind and serve until CTRL+C
pub async fn start_server(ctx: Arc<ServerContext>, sessions: mpsc::Sender<Session>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(ctx, sessions, shutdown_rx).await
}
