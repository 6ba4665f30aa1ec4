//! Timeouts used across connection setup and sessions.
//!
//! The blocking handshake relies on socket-level receive timeouts built from
//! these constants; the async session uses [`with_timeout_error`].

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single async session operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket receive timeout while the handshake is in progress
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4);

/// Pause between checks for a rendezvous file
pub const RENDEZVOUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause before re-reading a rendezvous file that was still being written
pub const SHORT_READ_DELAY: Duration = Duration::from_millis(10);

/// Time the listener waits for sessions to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, mapping an elapsed timer to [`ProtocolError::Timeout`]
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Await a future that cannot fail by itself
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}
