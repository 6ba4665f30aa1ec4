//! # Core Codec Components
//!
//! Byte buffer, value model, type registry and numeric coercion.
//!
//! This module is the foundation every other layer builds on: the handshake
//! and the session exchange nothing but bytes produced and consumed here.
//!
//! ## Components
//! - **Buffer**: growable byte region with pack and unpack cursors
//! - **Types**: wire tags and the closed `Value` sum type
//! - **Registry**: O(1) tag to codec dispatch, built once
//! - **Codec**: public `pack`/`unpack` entry points
//! - **Coerce**: checked conversion between numeric kinds
//!
//! ## Security
//! - Every length and count read from a peer is bounds checked
//! - Nested composites are depth limited
//! - Failed operations leave cursors where they were

pub mod buffer;
pub mod codec;
pub mod coerce;
mod pack;
pub mod print;
pub mod registry;
pub mod types;
mod unpack;

pub use buffer::{Buffer, BufferMode};
pub use codec::{pack, pack_one, peek_type, unpack, unpack_one, WireType};
pub use types::{DataArray, DataType, Info, KeyValue, ProcId, Rank, TimeVal, Value};
pub use unpack::MAX_NESTING_DEPTH;
