//! # Error Types
//!
//! Error handling for the wire codec, the connection handshake and the
//! session layer built on top of them.
//!
//! Every failure is a [`ProtocolError`]. Errors that cross the wire travel as a
//! numeric [`Status`] word; the two convert into each other so a status read
//! from a peer becomes a typed error locally.
//!
//! ## Error Categories
//! - **Codec Errors**: unknown or mismatched tags, read past end, coercion failures
//! - **Connection Errors**: unreachable peers, timeouts, closed sockets
//! - **Security Errors**: rejected credentials, failed challenges
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use launchwire::error::{ProtocolError, Result, Status};
//!
//! fn check(status: Status) -> Result<()> {
//!     status.into_result()
//! }
//!
//! assert!(check(Status::SUCCESS).is_ok());
//! assert!(matches!(
//!     check(Status::INVALID_CREDENTIAL),
//!     Err(ProtocolError::InvalidCredential)
//! ));
//! ```

use crate::core::types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_NOT_SELF_DESCRIBING: &str = "Buffer is not self-describing";
    pub const ERR_NESTING_TOO_DEEP: &str = "Nested value exceeds maximum depth";
    pub const ERR_NEGATIVE_COUNT: &str = "Negative element count";
    pub const ERR_STRING_NOT_TERMINATED: &str = "String is not NUL terminated";
    pub const ERR_STRING_NOT_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_STRING_TOO_LONG: &str = "String length exceeds wire limit";
    pub const ERR_INVALID_BOOL: &str = "Boolean byte is neither 0 nor 1";

    /// Framing errors
    pub const ERR_LENGTH_DIVERGED: &str = "Header length does not match the serialized tail";
    pub const ERR_TRUNCATED_TAIL: &str = "Identity message ended before all fields were read";
    pub const ERR_OVERSIZED_TAIL: &str = "Identity message exceeds maximum size";
    pub const ERR_UNEXPECTED_TAG: &str = "Unexpected routing tag on identity message";

    /// Connection errors
    pub const ERR_CONNECT_EXHAUSTED: &str = "Connect retries exhausted";
    pub const ERR_HANDSHAKE_EXHAUSTED: &str = "Handshake retries exhausted";
    pub const ERR_RENDEZVOUS_MISSING: &str = "Rendezvous file did not appear";
    pub const ERR_RENDEZVOUS_EMPTY: &str = "Rendezvous file is empty";

    /// Handshake errors
    pub const ERR_INVALID_FLAG: &str = "Invalid identity flag";
    pub const ERR_MISSING_IDENTITY: &str = "Identity flag requires a process identifier";
    pub const ERR_INVALID_VERSION: &str = "Malformed protocol version string";
    pub const ERR_UNKNOWN_SECURITY: &str = "Unknown security module";
    pub const ERR_CHALLENGE_FAILED: &str = "Security challenge failed";
    pub const ERR_UNKNOWN_CLIENT: &str = "Client is not registered with this server";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Numeric status word exchanged on the wire.
///
/// Zero is success, every failure is negative. Unknown codes received from a
/// peer are preserved as-is and surface as [`ProtocolError::PeerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const ERROR: Status = Status(-1);
    pub const TEMP_UNAVAILABLE: Status = Status(-3);
    pub const READY_FOR_HANDSHAKE: Status = Status(-14);
    pub const INVALID_CREDENTIAL: Status = Status(-15);
    pub const HANDSHAKE_FAILED: Status = Status(-16);
    pub const UNREACHABLE: Status = Status(-17);
    pub const TIMEOUT: Status = Status(-18);
    pub const NOT_SUPPORTED: Status = Status(-19);
    pub const BAD_PARAM: Status = Status(-20);
    pub const OUT_OF_RESOURCE: Status = Status(-21);
    pub const TYPE_MISMATCH: Status = Status(-22);
    pub const UNKNOWN_TYPE: Status = Status(-23);
    pub const LOST_PRECISION: Status = Status(-24);
    pub const SIGN_CHANGE: Status = Status(-25);
    pub const READ_PAST_END: Status = Status(-26);
    pub const INADEQUATE_SPACE: Status = Status(-27);
    pub const UNPACK_FAILURE: Status = Status(-28);
    pub const NOT_FOUND: Status = Status(-29);
    pub const NOT_INITIALIZED: Status = Status(-30);
    pub const CONNECTION_CLOSED: Status = Status(-31);

    /// Raw wire code
    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    /// Symbolic name, or `None` for codes this crate does not define
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Status::SUCCESS => "SUCCESS",
            Status::ERROR => "ERROR",
            Status::TEMP_UNAVAILABLE => "ERR_TEMP_UNAVAILABLE",
            Status::READY_FOR_HANDSHAKE => "ERR_READY_FOR_HANDSHAKE",
            Status::INVALID_CREDENTIAL => "ERR_INVALID_CRED",
            Status::HANDSHAKE_FAILED => "ERR_HANDSHAKE_FAILED",
            Status::UNREACHABLE => "ERR_UNREACH",
            Status::TIMEOUT => "ERR_TIMEOUT",
            Status::NOT_SUPPORTED => "ERR_NOT_SUPPORTED",
            Status::BAD_PARAM => "ERR_BAD_PARAM",
            Status::OUT_OF_RESOURCE => "ERR_OUT_OF_RESOURCE",
            Status::TYPE_MISMATCH => "ERR_TYPE_MISMATCH",
            Status::UNKNOWN_TYPE => "ERR_UNKNOWN_DATA_TYPE",
            Status::LOST_PRECISION => "ERR_LOST_PRECISION",
            Status::SIGN_CHANGE => "ERR_CHANGE_SIGN",
            Status::READ_PAST_END => "ERR_UNPACK_READ_PAST_END_OF_BUFFER",
            Status::INADEQUATE_SPACE => "ERR_UNPACK_INADEQUATE_SPACE",
            Status::UNPACK_FAILURE => "ERR_UNPACK_FAILURE",
            Status::NOT_FOUND => "ERR_NOT_FOUND",
            Status::NOT_INITIALIZED => "ERR_INIT",
            Status::CONNECTION_CLOSED => "ERR_LOST_CONNECTION",
            _ => return None,
        };
        Some(name)
    }

    /// Convert a status received from a peer into a local result
    pub fn into_result(self) -> Result<()> {
        match self {
            Status::SUCCESS => Ok(()),
            Status::TEMP_UNAVAILABLE => Err(ProtocolError::TempUnavailable),
            Status::INVALID_CREDENTIAL => Err(ProtocolError::InvalidCredential),
            Status::UNREACHABLE => Err(ProtocolError::Unreachable(
                "peer reported unreachable".into(),
            )),
            Status::TIMEOUT => Err(ProtocolError::Timeout),
            Status::NOT_SUPPORTED => Err(ProtocolError::NotSupported(
                "peer reported not supported".into(),
            )),
            Status::CONNECTION_CLOSED => Err(ProtocolError::ConnectionClosed),
            Status::NOT_INITIALIZED => Err(ProtocolError::NotInitialized),
            Status::OUT_OF_RESOURCE => Err(ProtocolError::OutOfResource),
            other => Err(ProtocolError::PeerStatus(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "UNKNOWN STATUS ({})", self.0),
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

// ProtocolError is the primary error type for all codec and connection operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Bad parameter: {0}")]
    BadParam(String),

    #[error("Out of resource")]
    OutOfResource,

    #[error("Unknown data type tag: {0}")]
    UnknownType(u16),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: DataType, found: DataType },

    #[error("Lost precision converting {from} to {to}")]
    LostPrecision { from: DataType, to: DataType },

    #[error("Sign change converting {from} to {to}")]
    SignChange { from: DataType, to: DataType },

    #[error("Read past end of buffer")]
    ReadPastEnd,

    #[error("Inadequate space: {available} slots for {required} values")]
    InadequateSpace { required: usize, available: usize },

    #[error("Unpack failure: {0}")]
    UnpackFailure(String),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Temporarily unavailable")]
    TempUnavailable,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Peer returned status {0}")]
    PeerStatus(Status),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Status word used when reporting this error to a peer
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::Io(_) => Status::UNREACHABLE,
            ProtocolError::NotInitialized => Status::NOT_INITIALIZED,
            ProtocolError::BadParam(_) => Status::BAD_PARAM,
            ProtocolError::OutOfResource => Status::OUT_OF_RESOURCE,
            ProtocolError::UnknownType(_) => Status::UNKNOWN_TYPE,
            ProtocolError::TypeMismatch { .. } => Status::TYPE_MISMATCH,
            ProtocolError::LostPrecision { .. } => Status::LOST_PRECISION,
            ProtocolError::SignChange { .. } => Status::SIGN_CHANGE,
            ProtocolError::ReadPastEnd => Status::READ_PAST_END,
            ProtocolError::InadequateSpace { .. } => Status::INADEQUATE_SPACE,
            ProtocolError::UnpackFailure(_) => Status::UNPACK_FAILURE,
            ProtocolError::Unreachable(_) => Status::UNREACHABLE,
            ProtocolError::InvalidCredential => Status::INVALID_CREDENTIAL,
            ProtocolError::Timeout => Status::TIMEOUT,
            ProtocolError::NotSupported(_) => Status::NOT_SUPPORTED,
            ProtocolError::TempUnavailable => Status::TEMP_UNAVAILABLE,
            ProtocolError::ConnectionClosed => Status::CONNECTION_CLOSED,
            ProtocolError::Framing(_) => Status::ERROR,
            ProtocolError::HandshakeError(_) => Status::HANDSHAKE_FAILED,
            ProtocolError::PeerStatus(status) => *status,
            ProtocolError::NotFound(_) => Status::NOT_FOUND,
            ProtocolError::ConfigError(_) => Status::BAD_PARAM,
        }
    }

    /// Whether the handshake step may be retried after this failure.
    ///
    /// Only an explicit temporarily-unavailable signal qualifies. A rejected
    /// credential is always fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::TempUnavailable | ProtocolError::PeerStatus(Status::TEMP_UNAVAILABLE)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_error() {
        for status in [
            Status::TEMP_UNAVAILABLE,
            Status::INVALID_CREDENTIAL,
            Status::TIMEOUT,
            Status::NOT_SUPPORTED,
            Status::CONNECTION_CLOSED,
            Status::LOST_PRECISION,
        ] {
            let err = status.into_result().unwrap_err();
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status = Status(-4242);
        assert_eq!(status.name(), None);
        assert!(matches!(
            status.into_result(),
            Err(ProtocolError::PeerStatus(Status(-4242)))
        ));
        assert_eq!(status.to_string(), "UNKNOWN STATUS (-4242)");
    }

    #[test]
    fn only_temporary_failures_retry() {
        assert!(ProtocolError::TempUnavailable.is_retryable());
        assert!(ProtocolError::PeerStatus(Status::TEMP_UNAVAILABLE).is_retryable());
        assert!(!ProtocolError::InvalidCredential.is_retryable());
        assert!(!ProtocolError::Timeout.is_retryable());
    }
}
