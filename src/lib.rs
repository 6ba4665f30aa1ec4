//! # launchwire
//!
//! Wire protocol engine for process-management peers: a self-describing
//! binary codec, a connection handshake with pluggable security, and a fan-in
//! rollup for collective operations.
//!
//! ## Layers
//! - [`core`]: byte buffer, tagged values, type registry, numeric coercion
//! - [`protocol`]: identity framing, handshake state machine, sessions
//! - [`security`]: credential modules looked up by name
//! - [`transport`]: addresses, bounded connect, rendezvous files, listener
//! - [`utils`]: logging, metrics, timeouts, rollup
//!
//! ## Example
//! ```
//! use launchwire::core::{Buffer, BufferMode, DataType, Value};
//!
//! let mut buf = Buffer::new(BufferMode::SelfDescribing);
//! launchwire::core::pack(&mut buf, DataType::UInt64, &[Value::UInt64(100)]).unwrap();
//!
//! // a numeric group can be requested under another numeric kind
//! let values = launchwire::core::unpack(&mut buf, DataType::Int32, 1).unwrap();
//! assert_eq!(values, vec![Value::Int32(100)]);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod security;
pub mod transport;
pub mod utils;

pub use config::WireConfig;
pub use error::{ProtocolError, Result, Status};
