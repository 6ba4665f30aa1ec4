//! # Connection Protocol
//!
//! Everything between "socket connected" and "session established", plus the
//! session itself.
//!
//! ## Components
//! - **Header**: fixed 12-byte wire header and the tokio codec for messages
//! - **Identity**: peer roles, identity flags and protocol versions
//! - **Framer**: builds and parses the identity message
//! - **Handshake**: client state machine and server connection handler
//! - **Session**: ordered async message exchange with a confirmed peer
//!
//! ## Security
//! - Identity tails above the configured size are refused before allocation
//! - Credentials are validated by the named security module
//! - Only explicitly temporary failures are retried

pub mod framer;
pub mod handshake;
pub mod header;
pub mod identity;
pub mod session;

pub use framer::ConnectRequest;
pub use handshake::{accept_handshake, connect, Confirmation, HandshakeState, ServerContext};
pub use header::{MessageCodec, WireHeader, WireMessage};
pub use identity::{IdentityFlag, PeerType, ProtocolVersion};
pub use session::{PeerInfo, Session};
