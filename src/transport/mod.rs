//! # Transport Layer
//!
//! Addresses, blocking connection setup, rendezvous files and the local
//! socket listener.

pub mod address;
#[cfg(unix)]
pub mod local;
pub mod rendezvous;

pub use address::{connect_with_retry, Connector, PeerAddr, PeerStream, SocketConnector};
