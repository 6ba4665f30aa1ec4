//! # Wire Header and Message Codec
//!
//! Every message on a connection is a fixed 12-byte header followed by
//! exactly `nbytes` of payload.
//!
//! ```text
//! +-------------+-----------+--------------+-----------------+
//! | pindex: i32 | tag: u32  | nbytes: u32  | payload bytes   |
//! +-------------+-----------+--------------+-----------------+
//!      4 BE         4 BE         4 BE          nbytes
//! ```
//!
//! The blocking helpers serve the handshake; [`MessageCodec`] drives the
//! async session once the peer is confirmed.

use crate::core::buffer::{Buffer, BufferMode};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Encoded header length
pub const HEADER_SIZE: usize = 12;

/// Routing tag reserved for the identity message
pub const IDENTITY_TAG: u32 = u32::MAX;

/// Peer index placeholder before the server assigns one
pub const UNASSIGNED_INDEX: i32 = -1;

/// Largest payload the session codec accepts
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub pindex: i32,
    pub tag: u32,
    pub nbytes: u32,
}

impl WireHeader {
    pub fn new(pindex: i32, tag: u32, nbytes: u32) -> Self {
        Self { pindex, tag, nbytes }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.pindex.to_be_bytes());
        out[4..8].copy_from_slice(&self.tag.to_be_bytes());
        out[8..12].copy_from_slice(&self.nbytes.to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        Self {
            pindex: i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            tag: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            nbytes: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.nbytes as usize
    }
}

/// Header plus payload, the unit exchanged by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub header: WireHeader,
    pub payload: Bytes,
}

impl WireMessage {
    /// Build a message whose header length matches `payload`
    pub fn new(pindex: i32, tag: u32, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let nbytes = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::Framing(format!("payload of {} bytes", payload.len())))?;
        Ok(Self {
            header: WireHeader::new(pindex, tag, nbytes),
            payload,
        })
    }

    /// Wrap the packed contents of `buf`
    pub fn from_buffer(pindex: i32, tag: u32, buf: &Buffer) -> Result<Self> {
        Self::new(pindex, tag, Bytes::copy_from_slice(buf.as_bytes()))
    }

    /// Load the payload into a fresh buffer ready for unpacking
    pub fn into_buffer(self, mode: BufferMode) -> Buffer {
        Buffer::from_bytes(mode, self.payload.to_vec())
    }

    pub fn tag(&self) -> u32 {
        self.header.tag
    }

    /// Header and payload as one contiguous block
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Length-delimited codec for [`WireMessage`]
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_payload: usize,
}

impl MessageCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for MessageCodec {
    type Item = WireMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&src[..HEADER_SIZE]);
        let header = WireHeader::decode(&raw);
        let len = header.payload_len();
        if len > self.max_payload {
            return Err(ProtocolError::Framing(format!(
                "payload of {len} bytes exceeds limit of {}",
                self.max_payload
            )));
        }

        let total = HEADER_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        trace!(tag = header.tag, len, "Decoded message");
        Ok(Some(WireMessage { header, payload }))
    }
}

impl Encoder<WireMessage> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: WireMessage, dst: &mut BytesMut) -> Result<()> {
        if msg.header.payload_len() != msg.payload.len() {
            return Err(ProtocolError::Framing(constants::ERR_LENGTH_DIVERGED.into()));
        }
        if msg.payload.len() > self.max_payload {
            return Err(ProtocolError::Framing(format!(
                "payload of {} bytes exceeds limit of {}",
                msg.payload.len(),
                self.max_payload
            )));
        }
        dst.reserve(HEADER_SIZE + msg.payload.len());
        dst.put_slice(&msg.header.encode());
        dst.put_slice(&msg.payload);
        Ok(())
    }
}

/// Map an I/O failure on a blocking handshake socket
pub(crate) fn map_io(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ProtocolError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionAborted => ProtocolError::ConnectionClosed,
        _ => ProtocolError::Io(e),
    }
}

/// Write all of `bytes`, blocking
pub fn send_all<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).map_err(map_io)?;
    writer.flush().map_err(map_io)
}

/// Read exactly `len` bytes; a short read is an error
pub fn recv_exact<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    reader.read_exact(&mut out).map_err(map_io)?;
    Ok(out)
}

pub fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<WireHeader> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw).map_err(map_io)?;
    Ok(WireHeader::decode(&raw))
}

/// Two-phase read: the header, then exactly `nbytes` of payload
pub fn read_message<R: Read + ?Sized>(reader: &mut R, max_payload: usize) -> Result<WireMessage> {
    let header = read_header(reader)?;
    if header.payload_len() > max_payload {
        return Err(ProtocolError::Framing(constants::ERR_OVERSIZED_TAIL.into()));
    }
    let payload = recv_exact(reader, header.payload_len())?;
    Ok(WireMessage {
        header,
        payload: Bytes::from(payload),
    })
}

/// Read one big-endian u32, as used for status words and indices
pub fn recv_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw).map_err(map_io)?;
    Ok(u32::from_be_bytes(raw))
}

pub fn send_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<()> {
    send_all(writer, &value.to_be_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_layout_is_big_endian() {
        let header = WireHeader::new(UNASSIGNED_INDEX, IDENTITY_TAG, 0x0102);
        assert_eq!(
            header.encode(),
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0, 0, 1, 2]
        );
        assert_eq!(WireHeader::decode(&header.encode()), header);
    }

    #[test]
    fn codec_waits_for_full_payload() {
        let msg = WireMessage::new(3, 7, vec![1u8, 2, 3, 4]).unwrap();
        let mut codec = MessageCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(msg.clone(), &mut dst).unwrap();

        let mut partial = BytesMut::from(&dst[..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(codec.decode(&mut dst).unwrap(), Some(msg));
        assert!(dst.is_empty());
    }

    #[test]
    fn codec_rejects_oversized_payload() {
        let mut codec = MessageCodec::new(4);
        let mut src = BytesMut::new();
        src.put_slice(&WireHeader::new(0, 1, 5).encode());
        assert!(matches!(codec.decode(&mut src), Err(ProtocolError::Framing(_))));
    }

    #[test]
    fn encoder_rejects_length_mismatch() {
        let mut msg = WireMessage::new(0, 1, vec![0u8; 3]).unwrap();
        msg.header.nbytes = 9;
        let mut dst = BytesMut::new();
        assert!(MessageCodec::default().encode(msg, &mut dst).is_err());
    }

    #[test]
    fn short_payload_is_connection_closed() {
        let mut raw = WireHeader::new(0, 1, 10).encode().to_vec();
        raw.extend_from_slice(&[1, 2, 3]);
        let err = read_message(&mut Cursor::new(raw), 64).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
